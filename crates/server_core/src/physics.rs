//! Physics engine seam used by the heartbeat, plus the kinematic engine that
//! drives scene groups from their velocities.

use crate::scene::SceneRegistry;
use anyhow::Result;
use glam::Vec3;
use net_core::entity::EntityId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait PhysicsEngine: Send {
    fn prepare_step(&mut self) {}
    /// Advance by `dt` seconds; returns simulated frames per second or any
    /// engine-specific rate.
    fn commit_step(&mut self, dt: f32) -> Result<f32>;
    /// Snapshot velocities and zero them.
    fn save_kinematic_state(&mut self);
    fn restore_kinematic_state(&mut self);
    fn is_globally_disabled(&self) -> bool;
    /// Engine-internal pass run with entity bookkeeping.
    fn update_internal(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEdge {
    Stopped,
    Started,
}

/// Reports changes of the disabled flag between consecutive observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhysicsGate {
    disabled: bool,
}

impl PhysicsGate {
    pub fn new(initially_disabled: bool) -> Self {
        Self { disabled: initially_disabled }
    }

    pub fn observe(&mut self, disabled: bool) -> Option<GateEdge> {
        if disabled == self.disabled {
            return None;
        }
        self.disabled = disabled;
        Some(if disabled { GateEdge::Stopped } else { GateEdge::Started })
    }
}

/// Moves scene groups by their velocity each step. The disable switch is
/// shared so operators and tests can toggle it while the heartbeat runs.
pub struct ScenePhysics {
    scene: Arc<SceneRegistry>,
    disabled: Arc<AtomicBool>,
    saved: Vec<(EntityId, Vec3)>,
    steps: u64,
}

impl ScenePhysics {
    pub fn new(scene: Arc<SceneRegistry>) -> Self {
        Self { scene, disabled: Arc::new(AtomicBool::new(false)), saved: Vec::new(), steps: 0 }
    }

    pub fn switch(&self) -> Arc<AtomicBool> {
        self.disabled.clone()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl PhysicsEngine for ScenePhysics {
    fn commit_step(&mut self, dt: f32) -> Result<f32> {
        self.scene.integrate(dt);
        self.steps += 1;
        Ok(if dt > 0.0 { 1.0 / dt } else { 0.0 })
    }

    fn save_kinematic_state(&mut self) {
        self.saved = self.scene.take_velocities();
    }

    fn restore_kinematic_state(&mut self) {
        let saved = std::mem::take(&mut self.saved);
        self.scene.restore_velocities(&saved);
    }

    fn is_globally_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }
}
