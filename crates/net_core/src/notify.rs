//! Typed world-change notifications and an explicit observer list.
//!
//! Publishers (heartbeat event step, physics callbacks, scene mutations)
//! call [`EventBus::publish`]; observers are invoked on the publishing thread
//! after the list lock is released, so an observer may unsubscribe itself.

use crate::entity::{AnimationSet, AvatarId, EntityId};
use crate::flags::UpdateFlags;
use glam::Vec3;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum WorldEvent {
    EntityChanged { part: EntityId, flags: UpdateFlags },
    AvatarChanged { avatar: AvatarId, flags: UpdateFlags },
    /// `child == true`: the avatar left this region and is now only a child agent.
    AvatarChildState { avatar: AvatarId, child: bool },
    DrawDistanceChanged { avatar: AvatarId, distance: f32 },
    CameraMoved { avatar: AvatarId, position: Vec3, velocity: Vec3 },
    CameraRotated { avatar: AvatarId },
    AnimationsChanged { avatar: AvatarId, anims: AnimationSet },
    ClientClosing { avatar: AvatarId },
    /// Generic per-frame notification from the region heartbeat.
    Frame { frame: u64 },
}

pub trait WorldObserver: Send + Sync {
    fn on_event(&self, event: &WorldEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Observers>,
}

#[derive(Default)]
struct Observers {
    next: u64,
    list: Vec<(SubscriberId, Arc<dyn WorldObserver>)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn WorldObserver>) -> SubscriberId {
        let mut o = self.inner.lock();
        let id = SubscriberId(o.next);
        o.next += 1;
        o.list.push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut o = self.inner.lock();
        let before = o.list.len();
        o.list.retain(|(sid, _)| *sid != id);
        o.list.len() != before
    }

    pub fn publish(&self, event: &WorldEvent) {
        let targets: Vec<Arc<dyn WorldObserver>> =
            self.inner.lock().list.iter().map(|(_, o)| o.clone()).collect();
        for t in targets {
            t.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
