//! One hosted region: scene, event bus, viewer connections and heartbeat.

use crate::heartbeat::{Heartbeat, HeartbeatCfg, HeartbeatHandle, HeartbeatState, HeartbeatStats, RegionTasks};
use crate::physics::{PhysicsEngine, ScenePhysics};
use crate::scene::SceneRegistry;
use crate::sessions::{ConnectionManager, PumpReport};
use anyhow::{Context, Result, bail};
use data_runtime::configs::region::RegionCfg;
use glam::Vec3;
use net_core::entity::AvatarId;
use net_core::flags::UpdateFlags;
use net_core::interest::Culler;
use net_core::notify::{EventBus, WorldEvent};
use net_core::transport::ViewerTransport;
use net_core::viewer::{ViewerCfg, ViewerPipeline};
use net_core::world::WorldView;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Heartbeat-side view of the region.
pub struct RegionTicker {
    region: String,
    scene: Arc<SceneRegistry>,
    bus: Arc<EventBus>,
    connections: Arc<ConnectionManager>,
}

impl RegionTasks for RegionTicker {
    fn update_entities(&mut self, _dt: f32) -> Result<()> {
        let expired = self.scene.expire(Instant::now());
        if expired > 0 {
            tracing::debug!(region = %self.region, expired, "temporary groups removed");
        }
        Ok(())
    }

    fn frame_event(&mut self, frame: u64) -> Result<()> {
        self.bus.publish(&WorldEvent::Frame { frame });
        Ok(())
    }

    fn send_coarse_locations(&mut self, cap: usize) -> Result<()> {
        let (positions, ids) = self.scene.coarse_locations(cap);
        self.connections.broadcast_coarse_locations(&positions, &ids);
        Ok(())
    }

    fn physics_state_changed(&mut self, running: bool) -> Result<()> {
        tracing::info!(region = %self.region, running, "physics state changed");
        for a in self.scene.avatars().into_iter().filter(|a| !a.child) {
            self.bus.publish(&WorldEvent::AvatarChanged { avatar: a.id, flags: UpdateFlags::VELOCITY });
        }
        Ok(())
    }
}

pub struct Region {
    cfg: RegionCfg,
    bus: Arc<EventBus>,
    scene: Arc<SceneRegistry>,
    connections: Arc<ConnectionManager>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl Region {
    pub fn new(cfg: RegionCfg) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let scene = Arc::new(SceneRegistry::new(cfg.size_m, bus.clone()));
        let culler = Culler {
            region_size: cfg.size_m,
            region_view_distance: cfg.region_view_distance,
            see_into_region: cfg.see_into_region,
        };
        let viewer_cfg = ViewerCfg {
            warmup_flushes: cfg.warmup_flushes,
            debounce: Duration::from_millis(cfg.debounce_ms),
            move_threshold_sq: cfg.move_threshold_sq,
            min_draw_distance: data_runtime::configs::region::MIN_DRAW_DISTANCE,
            max_draw_distance: cfg.max_draw_distance,
        };
        let connections = ConnectionManager::new(&cfg.name, scene.clone(), bus.clone(), culler, viewer_cfg)
            .context("start scan worker")?;
        tracing::info!(region = %cfg.name, size_m = cfg.size_m, fps = cfg.frames_per_second, "region created");
        Ok(Self { cfg, bus, scene, connections: Arc::new(connections), heartbeat: Mutex::new(None) })
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn cfg(&self) -> &RegionCfg {
        &self.cfg
    }

    pub fn scene(&self) -> &Arc<SceneRegistry> {
        &self.scene
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Kinematic physics over this region's scene.
    pub fn scene_physics(&self) -> ScenePhysics {
        ScenePhysics::new(self.scene.clone())
    }

    /// Place the avatar (if new) and connect its viewer at the configured
    /// default draw distance.
    pub fn connect_viewer(
        &self,
        avatar: AvatarId,
        position: Vec3,
        transport: Arc<dyn ViewerTransport>,
    ) -> Result<Arc<ViewerPipeline>> {
        if !self.scene.has_avatar(avatar) {
            self.scene.add_avatar(avatar, position);
        }
        self.connections.connect(avatar, transport, self.cfg.default_draw_distance)
    }

    pub fn disconnect_viewer(&self, avatar: AvatarId) -> bool {
        self.bus.publish(&WorldEvent::ClientClosing { avatar });
        let was = self.connections.disconnect(avatar);
        self.scene.remove_avatar(avatar);
        was
    }

    pub fn viewer_draw_distance(&self, avatar: AvatarId, distance: f32) {
        self.bus.publish(&WorldEvent::DrawDistanceChanged { avatar, distance });
    }

    pub fn viewer_camera_rotated(&self, avatar: AvatarId) {
        self.bus.publish(&WorldEvent::CameraRotated { avatar });
    }

    pub fn start_heartbeat(&self, physics: Box<dyn PhysicsEngine>) -> Result<()> {
        let mut slot = self.heartbeat.lock();
        if slot.as_ref().is_some_and(HeartbeatHandle::is_running) {
            bail!("heartbeat for {} already running", self.cfg.name);
        }
        let ticker = RegionTicker {
            region: self.cfg.name.clone(),
            scene: self.scene.clone(),
            bus: self.bus.clone(),
            connections: self.connections.clone(),
        };
        let hb = Heartbeat::new(HeartbeatCfg::from(&self.cfg), Box::new(ticker), physics);
        *slot = Some(crate::heartbeat::start_heartbeat(hb).context("spawn heartbeat thread")?);
        Ok(())
    }

    pub fn stop_heartbeat(&self) {
        if let Some(mut h) = self.heartbeat.lock().take() {
            h.stop();
        }
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.lock().as_ref().map_or(HeartbeatState::Stopped, HeartbeatHandle::state)
    }

    pub fn heartbeat_stats(&self) -> Option<HeartbeatStats> {
        self.heartbeat.lock().as_ref().map(HeartbeatHandle::stats)
    }

    pub fn frame(&self) -> u64 {
        self.heartbeat.lock().as_ref().map_or(0, HeartbeatHandle::frame)
    }

    /// One pump pass over every viewer with the configured budgets.
    pub fn pump_viewers(&self) -> PumpReport {
        self.connections.pump(self.cfg.max_entity_updates, self.cfg.max_avatar_updates)
    }

    /// Stop the heartbeat and disconnect every viewer.
    pub fn shutdown(&self) {
        self.stop_heartbeat();
        self.connections.shutdown();
        tracing::info!(region = %self.cfg.name, "region shut down");
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
