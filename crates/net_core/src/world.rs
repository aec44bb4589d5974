//! Read-only view of the authoritative region state.

use crate::entity::{AvatarId, AvatarState, EntityGroup, EntityId};
use std::sync::Arc;

/// Snapshot and lookup interface supplied by the entity/presence registry.
///
/// Implementations must be callable from any thread; every method returns an
/// owned snapshot so callers never hold registry locks.
pub trait WorldView: Send + Sync {
    /// Edge length of the region in meters.
    fn region_size(&self) -> f32;
    fn groups(&self) -> Vec<Arc<EntityGroup>>;
    fn group(&self, id: EntityId) -> Option<Arc<EntityGroup>>;
    /// Group owning the part `part` (root or child).
    fn group_of_part(&self, part: EntityId) -> Option<Arc<EntityGroup>>;
    fn avatars(&self) -> Vec<AvatarState>;
    fn avatar(&self, id: AvatarId) -> Option<AvatarState>;
}
