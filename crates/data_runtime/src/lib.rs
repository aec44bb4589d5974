//! data_runtime: configuration schemas and loaders for a hosted region.
//!
//! Files live under `data/config/` at the workspace root (or under
//! `$DATA_ROOT/config/` when that env var is set). Every loader falls back to
//! defaults when its file is missing and clamps out-of-range values instead of
//! failing startup.

use std::path::PathBuf;

pub mod configs {
    pub mod region;
    pub mod telemetry;
}

/// Resolve the data directory: `$DATA_ROOT`, else the workspace `data/`.
pub fn data_root() -> PathBuf {
    if let Ok(root) = std::env::var("DATA_ROOT") {
        return PathBuf::from(root);
    }
    let here = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let ws = here.join("../../data");
    if ws.is_dir() { ws } else { here.join("data") }
}
