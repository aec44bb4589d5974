//! Entity and avatar records as seen by the update pipeline.
//!
//! The pipeline treats an entity as opaque apart from identity, placement,
//! attachment and lifetime. Groups are immutable snapshots shared behind
//! `Arc`; the authoritative registry swaps in a new snapshot on change. Parts
//! are shared between snapshots so their cache serial survives the swap.

use glam::{Quat, Vec3};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AvatarId(pub u32);

/// One constituent part of a composite entity.
#[derive(Debug)]
pub struct Part {
    pub id: EntityId,
    /// Offset from the group origin (zero for the root part).
    pub offset: Vec3,
    pub rotation: Quat,
    cache_serial: AtomicU32,
}

impl Part {
    pub fn new(id: EntityId, offset: Vec3, rotation: Quat) -> Self {
        Self { id, offset, rotation, cache_serial: AtomicU32::new(0) }
    }

    /// Serial the client compares against its object cache.
    pub fn cache_serial(&self) -> u32 {
        self.cache_serial.load(Ordering::Relaxed)
    }

    /// Invalidate any cached representation held by clients.
    pub fn bump_cache_serial(&self) -> u32 {
        self.cache_serial.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// A composite entity: root part first, then its children.
#[derive(Debug, Clone)]
pub struct EntityGroup {
    /// Same as the root part id.
    pub id: EntityId,
    pub parts: Vec<Arc<Part>>,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    /// Bounding radius around `position`.
    pub radius: f32,
    pub name: String,
    pub description: String,
    pub text: String,
    /// Wearer when this group is an attachment.
    pub attached_to: Option<AvatarId>,
    pub deleted: bool,
    /// Temporary groups vanish at this instant.
    pub expires_at: Option<Instant>,
}

impl EntityGroup {
    /// Single-part group at `position`.
    pub fn single(id: EntityId, position: Vec3) -> Self {
        Self::with_parts(id, position, &[])
    }

    /// Root part `id` plus one child part per `(child_id, offset)`.
    pub fn with_parts(id: EntityId, position: Vec3, children: &[(EntityId, Vec3)]) -> Self {
        let mut parts = Vec::with_capacity(children.len() + 1);
        parts.push(Arc::new(Part::new(id, Vec3::ZERO, Quat::IDENTITY)));
        for (cid, off) in children {
            parts.push(Arc::new(Part::new(*cid, *off, Quat::IDENTITY)));
        }
        let radius = children.iter().map(|(_, o)| o.length()).fold(0.5_f32, f32::max);
        Self {
            id,
            parts,
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            radius,
            name: String::new(),
            description: String::new(),
            text: String::new(),
            attached_to: None,
            deleted: false,
            expires_at: None,
        }
    }

    pub fn root(&self) -> &Arc<Part> {
        &self.parts[0]
    }

    pub fn part(&self, id: EntityId) -> Option<&Arc<Part>> {
        self.parts.iter().find(|p| p.id == id)
    }

    pub fn is_attachment(&self) -> bool {
        self.attached_to.is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarState {
    pub id: AvatarId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub seated: bool,
    /// Child agents live in a neighbouring region and only peek in.
    pub child: bool,
}

impl AvatarState {
    pub fn new(id: AvatarId, position: Vec3) -> Self {
        Self { id, position, velocity: Vec3::ZERO, seated: false, child: false }
    }
}

/// Currently playing animations for one avatar (animation id, sequence).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnimationSet {
    pub anims: Vec<(u32, u32)>,
}
