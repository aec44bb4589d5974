//! Telemetry bootstrap for the region host (tracing + optional Prometheus metrics).

use anyhow::Result;
use data_runtime::configs::telemetry::TelemetryCfg;

pub struct TelemetryGuard {
    /// False when another subscriber was already installed (tests, embedders).
    pub installed: bool,
}

pub fn init_telemetry(cfg: &TelemetryCfg) -> Result<TelemetryGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};
    let level = cfg.log_level.clone().unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    // Console JSON by default
    let fmt_layer = if cfg.json_logs.unwrap_or(true) { fmt::layer().json().boxed() } else { fmt::layer().boxed() };
    // `try_init` also routes `log` records from net_core into this subscriber
    let installed = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init().is_ok();
    // Optional Prometheus metrics exporter
    if let Some(addr) = &cfg.metrics_addr {
        let addr = match addr.parse() {
            Ok(a) => a,
            Err(_e) => {
                // Fallback to a safe default and record an error counter
                metrics::counter!("server.errors_total", "site" => "telemetry.parse_addr").increment(1);
                std::net::SocketAddr::from(([127, 0, 0, 1], 9100))
            }
        };
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        if let Err(e) = builder.with_http_listener(addr).install() {
            tracing::warn!(target: "telemetry", %addr, error = %e, "metrics exporter not installed");
        }
    }
    // One-line effective config for operator visibility
    tracing::info!(
        target: "telemetry",
        log_level = ?cfg.log_level,
        json_logs = ?cfg.json_logs,
        metrics_addr = ?cfg.metrics_addr,
        installed,
        "telemetry initialized"
    );
    Ok(TelemetryGuard { installed })
}
