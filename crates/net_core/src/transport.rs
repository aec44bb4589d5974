//! Outbound side of a viewer connection.
//!
//! Implementations:
//! - `ChannelTransport`: in-proc bounded channel of typed messages for local
//!   demos and tests
//! - (external) the network session layer, which encodes each call on the wire

use crate::entity::{AnimationSet, AvatarId, AvatarState, EntityGroup, Part};
use crate::flags::UpdateFlags;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use glam::Vec3;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("viewer connection closed")]
    Disconnected,
    #[error("viewer outbound queue full")]
    Full,
    #[error("encode failed: {0}")]
    Encode(String),
}

/// One entity part update ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct EntityUpdate {
    pub part: Arc<Part>,
    pub group: Arc<EntityGroup>,
    pub flags: UpdateFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarUpdate {
    pub avatar: AvatarState,
    pub flags: UpdateFlags,
}

/// Calls the pipeline makes on a viewer's session. Never invoked with a
/// pipeline lock held.
pub trait ViewerTransport: Send + Sync {
    fn send_entity_updates(&self, updates: &[EntityUpdate]) -> Result<(), SendError>;
    fn send_avatar_updates(&self, updates: &[AvatarUpdate]) -> Result<(), SendError>;
    fn send_avatar_full(&self, avatar: &AvatarState) -> Result<(), SendError>;
    fn send_animations(&self, avatar: AvatarId, anims: &AnimationSet) -> Result<(), SendError>;
    fn send_object_properties(&self, groups: &[Arc<EntityGroup>]) -> Result<(), SendError>;
    fn send_coarse_locations(&self, positions: &[Vec3], ids: &[AvatarId]) -> Result<(), SendError>;
}

/// Typed message as delivered by [`ChannelTransport`].
#[derive(Debug, Clone)]
pub enum ViewerMessage {
    EntityUpdates(Vec<EntityUpdate>),
    AvatarUpdates(Vec<AvatarUpdate>),
    AvatarFull(AvatarState),
    Animations(AvatarId, AnimationSet),
    ObjectProperties(Vec<Arc<EntityGroup>>),
    CoarseLocations(Vec<Vec3>, Vec<AvatarId>),
}

/// In-process loopback using a crossbeam bounded channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: Sender<ViewerMessage>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<ViewerMessage>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    fn push(&self, msg: ViewerMessage) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Disconnected(_) => SendError::Disconnected,
        })
    }
}

impl ViewerTransport for ChannelTransport {
    fn send_entity_updates(&self, updates: &[EntityUpdate]) -> Result<(), SendError> {
        self.push(ViewerMessage::EntityUpdates(updates.to_vec()))
    }
    fn send_avatar_updates(&self, updates: &[AvatarUpdate]) -> Result<(), SendError> {
        self.push(ViewerMessage::AvatarUpdates(updates.to_vec()))
    }
    fn send_avatar_full(&self, avatar: &AvatarState) -> Result<(), SendError> {
        self.push(ViewerMessage::AvatarFull(avatar.clone()))
    }
    fn send_animations(&self, avatar: AvatarId, anims: &AnimationSet) -> Result<(), SendError> {
        self.push(ViewerMessage::Animations(avatar, anims.clone()))
    }
    fn send_object_properties(&self, groups: &[Arc<EntityGroup>]) -> Result<(), SendError> {
        self.push(ViewerMessage::ObjectProperties(groups.to_vec()))
    }
    fn send_coarse_locations(&self, positions: &[Vec3], ids: &[AvatarId]) -> Result<(), SendError> {
        self.push(ViewerMessage::CoarseLocations(positions.to_vec(), ids.to_vec()))
    }
}
