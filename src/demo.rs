//! Demo scene and loopback viewers used by the host binary and e2e tests.

use anyhow::Result;
use crossbeam_channel::Receiver;
use glam::{Vec3, vec3};
use net_core::entity::{AnimationSet, AvatarId, EntityId};
use net_core::transport::{ChannelTransport, ViewerMessage};
use server_core::Region;
use std::sync::Arc;

/// Messages a loopback viewer has received, by kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemoTotals {
    pub entity_updates: usize,
    pub avatar_updates: usize,
    pub avatar_fulls: usize,
    pub animations: usize,
    pub properties: usize,
    pub coarse: usize,
}

impl DemoTotals {
    pub fn absorb(&mut self, msg: &ViewerMessage) {
        match msg {
            ViewerMessage::EntityUpdates(u) => self.entity_updates += u.len(),
            ViewerMessage::AvatarUpdates(u) => self.avatar_updates += u.len(),
            ViewerMessage::AvatarFull(_) => self.avatar_fulls += 1,
            ViewerMessage::Animations(..) => self.animations += 1,
            ViewerMessage::ObjectProperties(g) => self.properties += g.len(),
            ViewerMessage::CoarseLocations(..) => self.coarse += 1,
        }
    }

    pub fn add(&mut self, other: &DemoTotals) {
        self.entity_updates += other.entity_updates;
        self.avatar_updates += other.avatar_updates;
        self.avatar_fulls += other.avatar_fulls;
        self.animations += other.animations;
        self.properties += other.properties;
        self.coarse += other.coarse;
    }
}

pub struct DemoViewer {
    pub avatar: AvatarId,
    pub rx: Receiver<ViewerMessage>,
    pub totals: DemoTotals,
}

impl DemoViewer {
    /// Drain whatever the loopback transport holds.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        for m in self.rx.try_iter() {
            self.totals.absorb(&m);
            n += 1;
        }
        n
    }
}

pub fn region_center(region: &Region) -> Vec3 {
    let h = region.cfg().size_m * 0.5;
    vec3(h, h, 0.0)
}

/// Ring of single-part groups around the region center; every other one
/// orbits slowly so the heartbeat has motion to distribute.
pub fn spawn_ring(region: &Region, count: usize, radius: f32) -> Vec<EntityId> {
    let center = region_center(region);
    let ids = region.scene().ring_spawn(center, count, radius);
    for (i, id) in ids.iter().enumerate().filter(|(i, _)| i % 2 == 0) {
        let a = (i as f32) / (count.max(1) as f32) * std::f32::consts::TAU;
        region.scene().set_group_velocity(*id, vec3(-a.sin(), a.cos(), 0.0));
        region.scene().set_group_text(*id, &format!("ring {i}"));
    }
    ids
}

/// Connect `count` loopback viewers, avatars spread around the center.
pub fn connect_viewers(region: &Region, count: u32, capacity: usize) -> Result<Vec<DemoViewer>> {
    let center = region_center(region);
    (0..count)
        .map(|i| {
            let avatar = AvatarId(1000 + i);
            let (t, rx) = ChannelTransport::new(capacity);
            region.connect_viewer(avatar, walk_position(center, i, 0.0), Arc::new(t))?;
            Ok(DemoViewer { avatar, rx, totals: DemoTotals::default() })
        })
        .collect()
}

fn walk_position(center: Vec3, i: u32, t: f32) -> Vec3 {
    let phase = i as f32 * 1.7 + t * 0.2;
    center + vec3(20.0 * phase.cos(), 20.0 * phase.sin(), 0.0)
}

/// Move every demo avatar along its circle to time `t` (seconds) and play a
/// walk animation.
pub fn walk(region: &Region, viewers: &[DemoViewer], t: f32) {
    let center = region_center(region);
    for (i, v) in viewers.iter().enumerate() {
        let i = i as u32;
        let pos = walk_position(center, i, t);
        let ahead = walk_position(center, i, t + 0.1);
        region.scene().move_avatar(v.avatar, pos, (ahead - pos) * 10.0);
        region.scene().set_animations(v.avatar, AnimationSet { anims: vec![(1, i)] });
    }
}
