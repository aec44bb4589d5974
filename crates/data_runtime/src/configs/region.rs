//! Region tuning loaded from data/config/region.toml with env overrides.
//!
//! Missing or zero-valued knobs fall back to fixed defaults; see [`clamp`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Hard cap for both simulation and physics rates.
pub const MAX_FPS: f32 = 45.0;
/// Smallest draw distance a viewer may request.
pub const MIN_DRAW_DISTANCE: f32 = 32.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegionCfg {
    pub name: String,
    /// Edge length of the (square) region in meters.
    pub size_m: f32,
    pub frames_per_second: f32,
    pub physics_fps: f32,
    /// Sub-task divisors: a task fires on frames where `frame % every == 0`.
    pub physics_every: u32,
    pub entity_every: u32,
    pub events_every: u32,
    pub coarse_location_every: u32,
    pub coarse_location_cap: usize,
    pub physics_tolerance_ms: f32,
    pub timing_history_len: usize,
    pub default_draw_distance: f32,
    pub max_draw_distance: f32,
    /// Region-wide view distance; when it covers the region every viewer
    /// sees everything regardless of its own camera draw distance.
    pub region_view_distance: f32,
    /// Whether agents in neighbouring regions may see into this one.
    pub see_into_region: bool,
    pub warmup_flushes: u32,
    pub debounce_ms: u64,
    pub move_threshold_sq: f32,
    pub max_entity_updates: usize,
    pub max_avatar_updates: usize,
    pub pump_interval_ms: u64,
    pub listen_ip: String,
    pub port: u16,
    pub bind_attempts: u32,
}

impl Default for RegionCfg {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            size_m: 256.0,
            frames_per_second: MAX_FPS,
            physics_fps: MAX_FPS,
            physics_every: 1,
            entity_every: 1,
            events_every: 1,
            coarse_location_every: 50,
            coarse_location_cap: 60,
            physics_tolerance_ms: 3.0,
            timing_history_len: 50,
            default_draw_distance: 64.0,
            max_draw_distance: 512.0,
            region_view_distance: 0.0,
            see_into_region: true,
            warmup_flushes: 30,
            debounce_ms: 3000,
            move_threshold_sq: 16.0,
            max_entity_updates: 100,
            max_avatar_updates: 60,
            pump_interval_ms: 50,
            listen_ip: "127.0.0.1".to_string(),
            port: 9000,
            bind_attempts: 3,
        }
    }
}

impl RegionCfg {
    /// Seconds per simulation frame.
    pub fn frame_interval_s(&self) -> f32 {
        1.0 / self.frames_per_second
    }

    /// Seconds per physics step.
    pub fn physics_interval_s(&self) -> f32 {
        1.0 / self.physics_fps
    }
}

fn fps_or_default(v: f32) -> f32 {
    if !v.is_finite() || v <= 0.0 { MAX_FPS } else { v.min(MAX_FPS) }
}

/// Replace zero/out-of-range values with defaults and enforce cross-field limits.
pub fn clamp(mut cfg: RegionCfg) -> RegionCfg {
    let d = RegionCfg::default();
    cfg.frames_per_second = fps_or_default(cfg.frames_per_second);
    cfg.physics_fps = fps_or_default(cfg.physics_fps).min(cfg.frames_per_second);
    for every in [
        &mut cfg.physics_every,
        &mut cfg.entity_every,
        &mut cfg.events_every,
        &mut cfg.coarse_location_every,
    ] {
        if *every == 0 {
            *every = 1;
        }
    }
    if cfg.size_m <= 0.0 {
        cfg.size_m = d.size_m;
    }
    if cfg.coarse_location_cap == 0 {
        cfg.coarse_location_cap = d.coarse_location_cap;
    }
    if cfg.physics_tolerance_ms <= 0.0 {
        cfg.physics_tolerance_ms = d.physics_tolerance_ms;
    }
    if cfg.timing_history_len == 0 {
        cfg.timing_history_len = d.timing_history_len;
    }
    if cfg.default_draw_distance < MIN_DRAW_DISTANCE {
        cfg.default_draw_distance = MIN_DRAW_DISTANCE;
    }
    if cfg.max_draw_distance < cfg.default_draw_distance {
        cfg.max_draw_distance = cfg.default_draw_distance;
    }
    if cfg.region_view_distance < 0.0 {
        cfg.region_view_distance = 0.0;
    }
    if cfg.debounce_ms == 0 {
        cfg.debounce_ms = d.debounce_ms;
    }
    if cfg.move_threshold_sq <= 0.0 {
        cfg.move_threshold_sq = d.move_threshold_sq;
    }
    if cfg.pump_interval_ms == 0 {
        cfg.pump_interval_ms = d.pump_interval_ms;
    }
    if cfg.bind_attempts == 0 {
        cfg.bind_attempts = d.bind_attempts;
    }
    cfg
}

/// Parse a region config from TOML text (no env overrides, clamped).
pub fn parse(txt: &str) -> Result<RegionCfg> {
    let cfg: RegionCfg = toml::from_str(txt).context("parse region TOML")?;
    Ok(clamp(cfg))
}

/// Load from an explicit path, then apply env overrides and clamping.
pub fn load_from(path: &Path) -> Result<RegionCfg> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RegionCfg = toml::from_str(&txt).context("parse region TOML")?;
    Ok(clamp(apply_env(cfg)))
}

/// Load data/config/region.toml, falling back to defaults when it is absent.
pub fn load_default() -> Result<RegionCfg> {
    let path = crate::data_root().join("config/region.toml");
    if path.is_file() {
        return load_from(&path);
    }
    Ok(clamp(apply_env(RegionCfg::default())))
}

fn apply_env(mut cfg: RegionCfg) -> RegionCfg {
    if let Ok(name) = std::env::var("REGION_NAME") {
        cfg.name = name;
    }
    if let Some(v) = std::env::var("REGION_FPS").ok().and_then(|v| v.parse().ok()) {
        cfg.frames_per_second = v;
    }
    if let Some(v) = std::env::var("PHYSICS_FPS").ok().and_then(|v| v.parse().ok()) {
        cfg.physics_fps = v;
    }
    if let Some(v) = std::env::var("DRAW_DISTANCE").ok().and_then(|v| v.parse().ok()) {
        cfg.default_draw_distance = v;
    }
    if let Some(v) = std::env::var("REGION_PORT").ok().and_then(|v| v.parse().ok()) {
        cfg.port = v;
    }
    cfg
}
