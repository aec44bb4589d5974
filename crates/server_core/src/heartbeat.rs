//! Region heartbeat: fixed-rate frame loop on a dedicated thread.
//!
//! Each frame, in order:
//! 1. bump the frame counter
//! 2. physics (every `physics_every` frames): edge-triggered stop/start,
//!    then prepare+commit when enough time has passed since the last commit
//! 3. entity bookkeeping plus the engine's internal pass (`entity_every`)
//! 4. frame notification (`events_every`)
//! 5. coarse avatar locations (`coarse_every`)
//! 6. record work time and compute the sleep that keeps the target rate
//!
//! Any error from steps 2-5 is fatal: it is logged with the region name and
//! the loop stops. Nothing restarts it.

use crate::physics::{GateEdge, PhysicsEngine, PhysicsGate};
use crate::timing::TimingHistory;
use anyhow::{Context, Result};
use data_runtime::configs::region::{MAX_FPS, RegionCfg};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep trim per frame, scaled by `physics_interval / frame_interval`.
pub const FUDGE_MS: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct HeartbeatCfg {
    pub region: String,
    pub frame_interval: Duration,
    pub physics_interval: Duration,
    pub physics_every: u64,
    pub entity_every: u64,
    pub events_every: u64,
    pub coarse_every: u64,
    pub coarse_cap: usize,
    pub tolerance: Duration,
    pub history_len: usize,
}

fn interval(secs: f32) -> Duration {
    Duration::try_from_secs_f32(secs).unwrap_or(Duration::from_secs_f32(1.0 / MAX_FPS))
}

impl From<&RegionCfg> for HeartbeatCfg {
    fn from(c: &RegionCfg) -> Self {
        Self {
            region: c.name.clone(),
            frame_interval: interval(c.frame_interval_s()),
            physics_interval: interval(c.physics_interval_s()),
            physics_every: u64::from(c.physics_every.max(1)),
            entity_every: u64::from(c.entity_every.max(1)),
            events_every: u64::from(c.events_every.max(1)),
            coarse_every: u64::from(c.coarse_location_every.max(1)),
            coarse_cap: c.coarse_location_cap,
            tolerance: Duration::try_from_secs_f32(c.physics_tolerance_ms / 1000.0).unwrap_or(Duration::ZERO),
            history_len: c.timing_history_len.max(1),
        }
    }
}

/// Region work the heartbeat drives.
pub trait RegionTasks: Send {
    /// Entity bookkeeping; `dt` is the simulated time since the last call.
    fn update_entities(&mut self, dt: f32) -> Result<()>;
    fn frame_event(&mut self, frame: u64) -> Result<()>;
    fn send_coarse_locations(&mut self, cap: usize) -> Result<()>;
    /// Physics was stopped (`running == false`) or restarted; tell presences.
    fn physics_state_changed(&mut self, running: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeartbeatStats {
    pub frame: u64,
    pub physics_steps: u64,
    /// Mean work time per frame, sleep excluded.
    pub avg_work_ms: f64,
    /// Mean start-to-start frame period.
    pub avg_period_ms: f64,
    pub last_physics_ms: f64,
    pub last_sleep_ms: f64,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub struct Heartbeat {
    cfg: HeartbeatCfg,
    tasks: Box<dyn RegionTasks>,
    physics: Box<dyn PhysicsEngine>,
    gate: PhysicsGate,
    frame: u64,
    last_physics: Instant,
    last_start: Option<Instant>,
    work: TimingHistory,
    periods: TimingHistory,
    physics_steps: u64,
    last_physics_ms: f64,
    last_sleep: Duration,
}

impl Heartbeat {
    pub fn new(cfg: HeartbeatCfg, tasks: Box<dyn RegionTasks>, physics: Box<dyn PhysicsEngine>) -> Self {
        let now = Instant::now();
        let gate = PhysicsGate::new(physics.is_globally_disabled());
        Self {
            // first physics frame is due immediately
            last_physics: now.checked_sub(cfg.physics_interval).unwrap_or(now),
            work: TimingHistory::new(cfg.history_len),
            periods: TimingHistory::new(cfg.history_len),
            cfg,
            tasks,
            physics,
            gate,
            frame: 0,
            last_start: None,
            physics_steps: 0,
            last_physics_ms: 0.0,
            last_sleep: Duration::ZERO,
        }
    }

    pub fn cfg(&self) -> &HeartbeatCfg {
        &self.cfg
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            frame: self.frame,
            physics_steps: self.physics_steps,
            avg_work_ms: self.work.average(),
            avg_period_ms: self.periods.average(),
            last_physics_ms: self.last_physics_ms,
            last_sleep_ms: ms(self.last_sleep),
        }
    }

    /// One frame without the trailing sleep; returns the sleep to apply.
    pub fn step(&mut self) -> Result<Duration> {
        let start = Instant::now();
        if let Some(prev) = self.last_start {
            self.periods.push(ms(start - prev));
        }
        self.last_start = Some(start);
        self.frame += 1;
        let frame = self.frame;

        if frame % self.cfg.physics_every == 0 {
            self.physics_step(start)?;
        }
        if frame % self.cfg.entity_every == 0 {
            let dt = self.cfg.frame_interval.as_secs_f32() * self.cfg.entity_every as f32;
            self.tasks.update_entities(dt).context("entity bookkeeping")?;
            self.physics.update_internal().context("physics internal update")?;
        }
        if frame % self.cfg.events_every == 0 {
            self.tasks.frame_event(frame).context("frame event")?;
        }
        if frame % self.cfg.coarse_every == 0 {
            self.tasks.send_coarse_locations(self.cfg.coarse_cap).context("coarse locations")?;
        }

        let work = ms(start.elapsed());
        self.work.push(work);
        metrics::histogram!("heartbeat.frame_ms").record(work);
        self.last_sleep = self.sleep_time();
        Ok(self.last_sleep)
    }

    fn physics_step(&mut self, now: Instant) -> Result<()> {
        let disabled = self.physics.is_globally_disabled();
        match self.gate.observe(disabled) {
            Some(GateEdge::Stopped) => {
                self.physics.save_kinematic_state();
                self.tasks.physics_state_changed(false).context("physics stop notify")?;
            }
            Some(GateEdge::Started) => {
                self.physics.restore_kinematic_state();
                self.last_physics = now.checked_sub(self.cfg.physics_interval).unwrap_or(now);
                self.tasks.physics_state_changed(true).context("physics start notify")?;
            }
            None => {}
        }
        if disabled {
            return Ok(());
        }
        let since = now.saturating_duration_since(self.last_physics);
        if since + self.cfg.tolerance < self.cfg.physics_interval {
            return Ok(());
        }
        let t0 = Instant::now();
        self.physics.prepare_step();
        self.physics.commit_step(self.cfg.physics_interval.as_secs_f32()).context("physics commit")?;
        self.last_physics = now;
        self.physics_steps += 1;
        self.last_physics_ms = ms(t0.elapsed());
        metrics::histogram!("heartbeat.physics_ms").record(self.last_physics_ms);
        Ok(())
    }

    /// `frame_interval - avg(work) - fudge`, clamped to `[0, frame_interval]`.
    pub fn sleep_time(&self) -> Duration {
        let frame_ms = ms(self.cfg.frame_interval);
        if frame_ms <= 0.0 {
            return Duration::ZERO;
        }
        let fudge = FUDGE_MS * (ms(self.cfg.physics_interval) / frame_ms);
        let s = (frame_ms - self.work.average() - fudge).clamp(0.0, frame_ms);
        Duration::from_secs_f64(s / 1000.0)
    }

    /// Run `n` paced frames on the calling thread.
    pub fn run_frames(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            let sleep = self.step()?;
            thread::sleep(sleep);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Running,
    Stopped,
}

struct Shared {
    run: AtomicBool,
    running: AtomicBool,
    frame: AtomicU64,
    stats: Mutex<HeartbeatStats>,
}

/// Marks the heartbeat stopped however its thread exits, panics included.
struct StoppedOnDrop(Arc<Shared>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

pub struct HeartbeatHandle {
    region: String,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// Move `hb` onto its own named thread and start looping.
pub fn start_heartbeat(mut hb: Heartbeat) -> std::io::Result<HeartbeatHandle> {
    let region = hb.cfg.region.clone();
    let shared = Arc::new(Shared {
        run: AtomicBool::new(true),
        running: AtomicBool::new(true),
        frame: AtomicU64::new(hb.frame),
        stats: Mutex::new(hb.stats()),
    });
    let sh = shared.clone();
    let name = region.clone();
    let thread = thread::Builder::new().name(format!("heartbeat-{region}")).spawn(move || {
        let _guard = StoppedOnDrop(sh.clone());
        tracing::info!(region = %name, "heartbeat started");
        while sh.run.load(Ordering::Acquire) {
            match hb.step() {
                Ok(sleep) => {
                    sh.frame.store(hb.frame(), Ordering::Release);
                    *sh.stats.lock() = hb.stats();
                    thread::sleep(sleep);
                }
                Err(e) => {
                    metrics::counter!("heartbeat.fatal_total").increment(1);
                    tracing::error!(region = %name, frame = hb.frame(), error = %format!("{e:#}"), "heartbeat failed; region stopped");
                    return;
                }
            }
        }
        tracing::info!(region = %name, frame = hb.frame(), "heartbeat stopped");
    })?;
    Ok(HeartbeatHandle { region, shared, thread: Some(thread) })
}

impl HeartbeatHandle {
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Clear the run flag and wait for the current frame to finish.
    pub fn stop(&mut self) {
        self.shared.run.store(false, Ordering::Release);
        if let Some(t) = self.thread.take() {
            if t.thread().id() != thread::current().id() && t.join().is_err() {
                tracing::error!(region = %self.region, "heartbeat thread panicked");
            }
        }
    }

    pub fn state(&self) -> HeartbeatState {
        if self.shared.running.load(Ordering::Acquire) { HeartbeatState::Running } else { HeartbeatState::Stopped }
    }

    pub fn is_running(&self) -> bool {
        self.state() == HeartbeatState::Running
    }

    pub fn frame(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HeartbeatStats {
        *self.shared.stats.lock()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
