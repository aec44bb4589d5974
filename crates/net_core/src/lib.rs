//! `net_core`: per-viewer interest management and update distribution
//!
//! Scope
//! - Entity/avatar snapshots and the read-only `WorldView` over them
//! - Update flags, the insertion-ordered merge queue and the culler
//! - `ViewerPipeline`: enqueue on world change, budgeted drain per pump tick
//! - Event bus, debounce timer and scan worker the pipeline relies on
//!
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod debounce;
pub mod entity;
pub mod flags;
pub mod interest;
pub mod notify;
pub mod priority;
pub mod queue;
pub mod scan;
pub mod transport;
pub mod viewer;
pub mod world;

pub use entity::{AnimationSet, AvatarId, AvatarState, EntityGroup, EntityId, Part};
pub use flags::UpdateFlags;
pub use interest::{Culler, ViewerFrame};
pub use notify::{EventBus, WorldEvent, WorldObserver};
pub use transport::{ChannelTransport, SendError, ViewerMessage, ViewerTransport};
pub use viewer::{FlushReport, ViewerCfg, ViewerDeps, ViewerPipeline};
pub use world::WorldView;
