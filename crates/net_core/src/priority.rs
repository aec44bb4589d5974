//! Ordering of newly visible entities. Scores never drop anything.

use crate::entity::EntityGroup;
use crate::interest::ViewerFrame;
use std::sync::Arc;

/// Lower score = sent earlier.
pub trait Prioritizer: Send + Sync {
    fn priority(&self, viewer: &ViewerFrame, group: &EntityGroup) -> f32;
}

/// Squared camera distance; the viewer's own attachments go first.
#[derive(Clone, Copy, Debug, Default)]
pub struct DistancePrioritizer;

impl Prioritizer for DistancePrioritizer {
    fn priority(&self, viewer: &ViewerFrame, group: &EntityGroup) -> f32 {
        if group.attached_to == Some(viewer.avatar) {
            return 0.0;
        }
        group.position.distance_squared(viewer.camera)
    }
}

/// Sort groups by ascending score; equal scores keep their input order.
pub fn order_groups(
    viewer: &ViewerFrame,
    prioritizer: &dyn Prioritizer,
    groups: Vec<Arc<EntityGroup>>,
) -> Vec<Arc<EntityGroup>> {
    let mut scored: Vec<(f32, Arc<EntityGroup>)> =
        groups.into_iter().map(|g| (prioritizer.priority(viewer, &g), g)).collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, g)| g).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AvatarId, EntityId};
    use glam::Vec3;

    #[test]
    fn nearest_first_and_own_attachment_before_everything() {
        let v = ViewerFrame { avatar: AvatarId(1), camera: Vec3::ZERO, draw_distance: 64.0, child: false };
        let far = Arc::new(EntityGroup::single(EntityId(1), Vec3::new(30.0, 0.0, 0.0)));
        let near = Arc::new(EntityGroup::single(EntityId(2), Vec3::new(3.0, 0.0, 0.0)));
        let mut worn = EntityGroup::single(EntityId(3), Vec3::new(50.0, 0.0, 0.0));
        worn.attached_to = Some(AvatarId(1));
        let ordered = order_groups(&v, &DistancePrioritizer, vec![far, near, Arc::new(worn)]);
        let ids: Vec<u32> = ordered.iter().map(|g| g.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
