//! Interest management: which entities and avatars a viewer should see.
//!
//! The culler is a pure predicate over read-only inputs; it is shared between
//! the drain thread, the scan worker and enqueue callers without locking.

use crate::entity::{AvatarId, AvatarState, EntityGroup};
use crate::world::WorldView;
use glam::Vec3;
use std::time::Instant;

/// Interest providers decide whether to include an item for a given client.
pub trait InterestProvider<T> {
    fn in_interest(&self, item: &T) -> bool;
}

/// Types that can expose a point (and extent) in world space for interest testing.
pub trait HasPoint {
    fn point(&self) -> Vec3;
    fn extent(&self) -> f32 {
        0.0
    }
}

impl HasPoint for EntityGroup {
    fn point(&self) -> Vec3 {
        self.position
    }
    fn extent(&self) -> f32 {
        self.radius
    }
}

impl HasPoint for AvatarState {
    fn point(&self) -> Vec3 {
        self.position
    }
}

/// Spherical interest volume in world coordinates. Items whose extent
/// touches the sphere are included.
#[derive(Clone, Copy, Debug)]
pub struct SphereInterest {
    pub center: Vec3,
    pub radius: f32,
}

impl<T: HasPoint> InterestProvider<T> for SphereInterest {
    fn in_interest(&self, item: &T) -> bool {
        let reach = self.radius + item.extent();
        item.point().distance_squared(self.center) <= reach * reach
    }
}

/// What the culler needs to know about the viewer at evaluation time.
#[derive(Clone, Copy, Debug)]
pub struct ViewerFrame {
    pub avatar: AvatarId,
    pub camera: Vec3,
    pub draw_distance: f32,
    /// Viewer's agent is a child agent peeking in from a neighbour.
    pub child: bool,
}

impl ViewerFrame {
    fn sphere(&self) -> SphereInterest {
        SphereInterest { center: self.camera, radius: self.draw_distance }
    }
}

/// Region-level inputs to visibility.
#[derive(Clone, Copy, Debug)]
pub struct Culler {
    pub region_size: f32,
    /// Configured region-wide view distance; wins over a smaller camera
    /// draw distance when deciding the whole-region fast path.
    pub region_view_distance: f32,
    pub see_into_region: bool,
}

impl Culler {
    /// Draw distance at or above which the whole region is visible.
    pub fn whole_region(&self, viewer: &ViewerFrame) -> bool {
        viewer.draw_distance.max(self.region_view_distance) >= self.region_size
    }

    fn viewer_blocked(&self, viewer: &ViewerFrame) -> bool {
        viewer.child && !self.see_into_region
    }

    /// Should `viewer` currently see `group`?
    pub fn should_show(
        &self,
        viewer: &ViewerFrame,
        group: &EntityGroup,
        world: &dyn WorldView,
        now: Instant,
    ) -> bool {
        if group.deleted || group.is_expired(now) || self.viewer_blocked(viewer) {
            return false;
        }
        if let Some(wearer) = group.attached_to {
            if wearer == viewer.avatar {
                return true;
            }
            // attachments follow the wearer, not their own position
            return world.avatar(wearer).is_some_and(|a| self.should_show_avatar(viewer, &a));
        }
        self.whole_region(viewer) || viewer.sphere().in_interest(group)
    }

    /// Should `viewer` currently see `avatar`?
    pub fn should_show_avatar(&self, viewer: &ViewerFrame, avatar: &AvatarState) -> bool {
        if avatar.id == viewer.avatar {
            return true;
        }
        if avatar.child || self.viewer_blocked(viewer) {
            return false;
        }
        self.whole_region(viewer) || viewer.sphere().in_interest(avatar)
    }
}
