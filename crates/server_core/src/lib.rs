//! `server_core`: the region side of the host.
//!
//! - `heartbeat`: fixed-rate frame loop with divisor-gated sub-tasks
//! - `scene`: in-memory entity/presence registry publishing world events
//! - `sessions`: connected viewers and their update pipelines
//! - `listener`: bounded-retry listener bind
//! - `region`: the facade tying these together
//!
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod heartbeat;
pub mod listener;
pub mod physics;
pub mod region;
pub mod scene;
pub mod sessions;
pub mod telemetry;
pub mod timing;

pub use heartbeat::{Heartbeat, HeartbeatCfg, HeartbeatHandle, HeartbeatState, HeartbeatStats, RegionTasks};
pub use region::Region;
pub use scene::SceneRegistry;
pub use sessions::{ConnectionManager, PumpReport};
