//! Connected viewers of one region.
//!
//! The manager owns the session store and the scan worker shared by every
//! pipeline. A session lives from `connect` to `disconnect` (or manager
//! drop); nothing else holds viewer state.

use anyhow::{Result, bail};
use glam::Vec3;
use net_core::entity::AvatarId;
use net_core::interest::Culler;
use net_core::notify::EventBus;
use net_core::priority::DistancePrioritizer;
use net_core::scan::ScanWorker;
use net_core::transport::ViewerTransport;
use net_core::viewer::{ViewerCfg, ViewerDeps, ViewerPipeline};
use net_core::world::WorldView;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

pub struct Session {
    pub avatar: AvatarId,
    pub pipeline: Arc<ViewerPipeline>,
    pub transport: Arc<dyn ViewerTransport>,
    pub connected_at: Instant,
}

/// Totals of one `pump` pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub viewers: usize,
    pub warming_up: usize,
    pub entities: usize,
    pub avatars: usize,
    pub animations: usize,
    pub properties: usize,
    pub failures: usize,
}

pub struct ConnectionManager {
    region: String,
    world: Arc<dyn WorldView>,
    bus: Arc<EventBus>,
    culler: Culler,
    viewer_cfg: ViewerCfg,
    scans: ScanWorker,
    sessions: RwLock<BTreeMap<AvatarId, Arc<Session>>>,
}

impl ConnectionManager {
    pub fn new(
        region: &str,
        world: Arc<dyn WorldView>,
        bus: Arc<EventBus>,
        culler: Culler,
        viewer_cfg: ViewerCfg,
    ) -> std::io::Result<Self> {
        let scans = ScanWorker::spawn(&format!("scan-{region}"))?;
        Ok(Self {
            region: region.to_string(),
            world,
            bus,
            culler,
            viewer_cfg,
            scans,
            sessions: RwLock::new(BTreeMap::new()),
        })
    }

    /// Create and subscribe a pipeline for `avatar`.
    pub fn connect(
        &self,
        avatar: AvatarId,
        transport: Arc<dyn ViewerTransport>,
        draw_distance: f32,
    ) -> Result<Arc<ViewerPipeline>> {
        if self.sessions.read().contains_key(&avatar) {
            bail!("avatar {} already connected to {}", avatar.0, self.region);
        }
        let deps = ViewerDeps {
            world: self.world.clone(),
            transport: transport.clone(),
            culler: self.culler,
            prioritizer: Arc::new(DistancePrioritizer),
            scans: self.scans.handle(),
        };
        let pipeline = ViewerPipeline::new(avatar, self.viewer_cfg.clone(), deps, draw_distance)?;
        let session = Arc::new(Session { avatar, pipeline: pipeline.clone(), transport, connected_at: Instant::now() });
        {
            let mut s = self.sessions.write();
            if s.contains_key(&avatar) {
                pipeline.close();
                bail!("avatar {} already connected to {}", avatar.0, self.region);
            }
            s.insert(avatar, session);
        }
        pipeline.attach(&self.bus);
        tracing::info!(region = %self.region, avatar = avatar.0, draw_distance, "viewer connected");
        Ok(pipeline)
    }

    /// Tear the session down. Returns false if `avatar` was not connected.
    pub fn disconnect(&self, avatar: AvatarId) -> bool {
        let Some(session) = self.sessions.write().remove(&avatar) else {
            return false;
        };
        session.pipeline.close();
        let stats = session.pipeline.stats();
        tracing::info!(
            region = %self.region,
            avatar = avatar.0,
            secs = session.connected_at.elapsed().as_secs_f32(),
            entities_sent = stats.entities_sent,
            avatars_sent = stats.avatars_sent,
            "viewer disconnected"
        );
        true
    }

    pub fn get(&self, avatar: AvatarId) -> Option<Arc<ViewerPipeline>> {
        self.sessions.read().get(&avatar).map(|s| s.pipeline.clone())
    }

    pub fn avatars(&self) -> Vec<AvatarId> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Drain every viewer once with the given budgets.
    pub fn pump(&self, max_entity_updates: usize, max_avatar_updates: usize) -> PumpReport {
        let mut total = PumpReport::default();
        for s in self.snapshot() {
            let r = s.pipeline.flush(max_entity_updates, max_avatar_updates);
            total.viewers += 1;
            total.warming_up += usize::from(r.warming_up);
            total.entities += r.entities;
            total.avatars += r.avatars_full + r.avatars_terse;
            total.animations += r.animations;
            total.properties += r.properties;
            total.failures += r.failures;
        }
        total
    }

    /// Send the same coarse-location sample to every viewer. Returns how many
    /// sends failed.
    pub fn broadcast_coarse_locations(&self, positions: &[Vec3], ids: &[AvatarId]) -> usize {
        let mut failed = 0;
        for s in self.snapshot() {
            if let Err(e) = s.transport.send_coarse_locations(positions, ids) {
                failed += 1;
                tracing::debug!(region = %self.region, avatar = s.avatar.0, error = %e, "coarse locations not sent");
            }
        }
        failed
    }

    /// Disconnect everyone.
    pub fn shutdown(&self) {
        for avatar in self.avatars() {
            self.disconnect(avatar);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
