//! In-memory entity/presence registry for one region.
//!
//! Holds the authoritative group and avatar snapshots, serves them through
//! [`WorldView`], and publishes a [`WorldEvent`] for every mutation. Events
//! are published after the registry lock is released because observers read
//! the registry back.

use glam::Vec3;
use net_core::entity::{AnimationSet, AvatarId, AvatarState, EntityGroup, EntityId};
use net_core::flags::UpdateFlags;
use net_core::notify::{EventBus, WorldEvent};
use net_core::world::WorldView;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct SceneInner {
    groups: HashMap<EntityId, Arc<EntityGroup>>,
    /// part id -> owning group id
    parts: HashMap<EntityId, EntityId>,
    avatars: BTreeMap<AvatarId, AvatarState>,
    next_id: u32,
}

impl SceneInner {
    fn replace_group(&mut self, id: EntityId, f: impl FnOnce(&mut EntityGroup)) -> Option<Arc<EntityGroup>> {
        let cur = self.groups.get(&id)?;
        let mut next = EntityGroup::clone(cur);
        f(&mut next);
        let next = Arc::new(next);
        self.groups.insert(id, next.clone());
        Some(next)
    }
}

pub struct SceneRegistry {
    size: f32,
    bus: Arc<EventBus>,
    inner: RwLock<SceneInner>,
}

impl SceneRegistry {
    pub fn new(size: f32, bus: Arc<EventBus>) -> Self {
        Self { size, bus, inner: RwLock::new(SceneInner { next_id: 1, ..SceneInner::default() }) }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Fresh id for a part or group; never reused.
    pub fn allocate_id(&self) -> EntityId {
        let mut s = self.inner.write();
        let id = EntityId(s.next_id);
        s.next_id += 1;
        id
    }

    /// Insert a group and announce it with a full update of its root.
    pub fn add_group(&self, group: EntityGroup) -> Arc<EntityGroup> {
        let group = Arc::new(group);
        {
            let mut s = self.inner.write();
            for p in &group.parts {
                s.parts.insert(p.id, group.id);
                s.next_id = s.next_id.max(p.id.0 + 1);
            }
            s.groups.insert(group.id, group.clone());
        }
        self.publish_entity(group.id, UpdateFlags::FULL_UPDATE);
        group
    }

    /// Build a group at `position` with one child part per offset.
    pub fn spawn_group(&self, position: Vec3, child_offsets: &[Vec3]) -> EntityId {
        let root = self.allocate_id();
        let children: Vec<(EntityId, Vec3)> = child_offsets.iter().map(|o| (self.allocate_id(), *o)).collect();
        self.add_group(EntityGroup::with_parts(root, position, &children)).id
    }

    /// `count` single-part groups evenly spaced on a circle around `center`.
    pub fn ring_spawn(&self, center: Vec3, count: usize, radius: f32) -> Vec<EntityId> {
        (0..count)
            .map(|i| {
                let a = (i as f32) / (count as f32) * std::f32::consts::TAU;
                let pos = center + Vec3::new(radius * a.cos(), radius * a.sin(), 0.0);
                self.spawn_group(pos, &[])
            })
            .collect()
    }

    fn update_group(&self, id: EntityId, flags: UpdateFlags, f: impl FnOnce(&mut EntityGroup)) -> bool {
        let changed = self.inner.write().replace_group(id, f).is_some();
        if changed {
            self.publish_entity(id, flags);
        }
        changed
    }

    pub fn move_group(&self, id: EntityId, position: Vec3) -> bool {
        self.update_group(id, UpdateFlags::POSITION, |g| g.position = position)
    }

    pub fn set_group_velocity(&self, id: EntityId, velocity: Vec3) -> bool {
        self.update_group(id, UpdateFlags::VELOCITY, |g| g.velocity = velocity)
    }

    pub fn set_group_text(&self, id: EntityId, text: &str) -> bool {
        self.update_group(id, UpdateFlags::TEXT, |g| g.text = text.to_string())
    }

    pub fn set_group_name(&self, id: EntityId, name: &str, description: &str) -> bool {
        self.update_group(id, UpdateFlags::PROPERTIES, |g| {
            g.name = name.to_string();
            g.description = description.to_string();
        })
    }

    pub fn attach_group(&self, id: EntityId, wearer: Option<AvatarId>) -> bool {
        self.update_group(id, UpdateFlags::FULL_UPDATE, |g| g.attached_to = wearer)
    }

    pub fn set_group_expiry(&self, id: EntityId, at: Option<Instant>) -> bool {
        self.update_group(id, UpdateFlags::FLAGS, |g| g.expires_at = at)
    }

    /// Mark the group deleted, let observers see that, then forget it.
    pub fn delete_group(&self, id: EntityId) -> bool {
        if self.inner.write().replace_group(id, |g| g.deleted = true).is_none() {
            return false;
        }
        self.publish_entity(id, UpdateFlags::FULL_UPDATE);
        let mut s = self.inner.write();
        if let Some(g) = s.groups.remove(&id) {
            for p in &g.parts {
                s.parts.remove(&p.id);
            }
        }
        true
    }

    /// Delete every temporary group whose lifetime ended. Returns the count.
    pub fn expire(&self, now: Instant) -> usize {
        let expired: Vec<EntityId> =
            self.inner.read().groups.values().filter(|g| !g.deleted && g.is_expired(now)).map(|g| g.id).collect();
        expired.into_iter().filter(|id| self.delete_group(*id)).count()
    }

    /// Advance moving groups by `dt` seconds. Returns how many moved.
    pub fn integrate(&self, dt: f32) -> usize {
        let moved: Vec<EntityId> = {
            let mut s = self.inner.write();
            let ids: Vec<EntityId> = s
                .groups
                .values()
                .filter(|g| !g.deleted && !g.is_attachment() && g.velocity != Vec3::ZERO)
                .map(|g| g.id)
                .collect();
            for id in &ids {
                s.replace_group(*id, |g| g.position += g.velocity * dt);
            }
            ids
        };
        for id in &moved {
            self.publish_entity(*id, UpdateFlags::POSITION | UpdateFlags::VELOCITY);
        }
        moved.len()
    }

    /// Zero every group velocity and return what was there.
    pub fn take_velocities(&self) -> Vec<(EntityId, Vec3)> {
        let mut s = self.inner.write();
        let moving: Vec<(EntityId, Vec3)> =
            s.groups.values().filter(|g| g.velocity != Vec3::ZERO).map(|g| (g.id, g.velocity)).collect();
        for (id, _) in &moving {
            s.replace_group(*id, |g| g.velocity = Vec3::ZERO);
        }
        moving
    }

    pub fn restore_velocities(&self, saved: &[(EntityId, Vec3)]) {
        let mut s = self.inner.write();
        for (id, v) in saved {
            s.replace_group(*id, |g| g.velocity = *v);
        }
    }

    fn publish_entity(&self, group: EntityId, flags: UpdateFlags) {
        self.bus.publish(&WorldEvent::EntityChanged { part: group, flags });
    }

    // ---- avatars ------------------------------------------------------

    /// Add a root avatar; viewers learn about it through the child-state
    /// transition.
    pub fn add_avatar(&self, id: AvatarId, position: Vec3) {
        self.inner.write().avatars.insert(id, AvatarState::new(id, position));
        self.bus.publish(&WorldEvent::AvatarChildState { avatar: id, child: false });
    }

    pub fn has_avatar(&self, id: AvatarId) -> bool {
        self.inner.read().avatars.contains_key(&id)
    }

    /// Move an avatar; its camera follows.
    pub fn move_avatar(&self, id: AvatarId, position: Vec3, velocity: Vec3) -> bool {
        {
            let mut s = self.inner.write();
            let Some(a) = s.avatars.get_mut(&id) else {
                return false;
            };
            a.position = position;
            a.velocity = velocity;
        }
        self.bus.publish(&WorldEvent::AvatarChanged {
            avatar: id,
            flags: UpdateFlags::POSITION | UpdateFlags::VELOCITY,
        });
        self.bus.publish(&WorldEvent::CameraMoved { avatar: id, position, velocity });
        true
    }

    pub fn set_seated(&self, id: AvatarId, seated: bool) -> bool {
        let changed = match self.inner.write().avatars.get_mut(&id) {
            Some(a) => {
                a.seated = seated;
                true
            }
            None => false,
        };
        if changed {
            self.bus.publish(&WorldEvent::AvatarChanged { avatar: id, flags: UpdateFlags::TERSE });
        }
        changed
    }

    /// Flip between root and child agent.
    pub fn set_child(&self, id: AvatarId, child: bool) -> bool {
        let changed = match self.inner.write().avatars.get_mut(&id) {
            Some(a) if a.child != child => {
                a.child = child;
                true
            }
            _ => false,
        };
        if changed {
            self.bus.publish(&WorldEvent::AvatarChildState { avatar: id, child });
        }
        changed
    }

    pub fn set_animations(&self, id: AvatarId, anims: AnimationSet) -> bool {
        if !self.has_avatar(id) {
            return false;
        }
        self.bus.publish(&WorldEvent::AnimationsChanged { avatar: id, anims });
        true
    }

    /// Forget an avatar; other viewers drop it as if it became a child agent.
    pub fn remove_avatar(&self, id: AvatarId) -> bool {
        if self.inner.write().avatars.remove(&id).is_none() {
            return false;
        }
        self.bus.publish(&WorldEvent::AvatarChildState { avatar: id, child: true });
        true
    }

    /// Root avatars in id order, at most `cap` of them.
    pub fn coarse_locations(&self, cap: usize) -> (Vec<Vec3>, Vec<AvatarId>) {
        let s = self.inner.read();
        s.avatars.values().filter(|a| !a.child).take(cap).map(|a| (a.position, a.id)).unzip()
    }

    pub fn group_count(&self) -> usize {
        self.inner.read().groups.len()
    }

    pub fn avatar_count(&self) -> usize {
        self.inner.read().avatars.len()
    }
}

impl WorldView for SceneRegistry {
    fn region_size(&self) -> f32 {
        self.size
    }

    fn groups(&self) -> Vec<Arc<EntityGroup>> {
        let mut v: Vec<Arc<EntityGroup>> = self.inner.read().groups.values().cloned().collect();
        v.sort_by_key(|g| g.id);
        v
    }

    fn group(&self, id: EntityId) -> Option<Arc<EntityGroup>> {
        self.inner.read().groups.get(&id).cloned()
    }

    fn group_of_part(&self, part: EntityId) -> Option<Arc<EntityGroup>> {
        let s = self.inner.read();
        let gid = s.parts.get(&part)?;
        s.groups.get(gid).cloned()
    }

    fn avatars(&self) -> Vec<AvatarState> {
        self.inner.read().avatars.values().cloned().collect()
    }

    fn avatar(&self, id: AvatarId) -> Option<AvatarState> {
        self.inner.read().avatars.get(&id).cloned()
    }
}
