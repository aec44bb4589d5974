use anyhow::{Context, Result};
use clap::Parser;
use data_runtime::configs::{region, telemetry};
use region_host::demo::{self, DemoTotals};
use server_core::{HeartbeatState, Region};
use server_core::listener::{StdinPrompt, bind_with_retry};
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Host one region with loopback viewers", long_about = None)]
struct Args {
    /// Region config file (default: data/config/region.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the listener port
    #[arg(long)]
    port: Option<u16>,
    /// How long to run before shutting down
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Loopback viewers to connect
    #[arg(long, default_value_t = 2)]
    viewers: u32,
    /// Demo groups in the ring around the region center
    #[arg(long, default_value_t = 24)]
    ring: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(p) => region::load_from(p)?,
        None => region::load_default()?,
    };
    if let Some(port) = args.port {
        cfg.port = port;
    }
    let _telemetry = server_core::telemetry::init_telemetry(&telemetry::load_default()?)?;

    let ip: IpAddr = cfg.listen_ip.parse().with_context(|| format!("listen_ip {:?}", cfg.listen_ip))?;
    let listener = bind_with_retry(ip, cfg.port, cfg.bind_attempts, &mut StdinPrompt)?;
    tracing::info!(region = %cfg.name, addr = ?listener.local_addr().ok(), "viewer listener ready");

    let pump_every = Duration::from_millis(cfg.pump_interval_ms.max(1));
    let region = Region::new(cfg)?;
    let ring = demo::spawn_ring(&region, args.ring, 40.0);
    let mut viewers = demo::connect_viewers(&region, args.viewers, 4096)?;
    tracing::info!(region = %region.name(), groups = ring.len(), viewers = viewers.len(), "demo scene ready");

    region.start_heartbeat(Box::new(region.scene_physics()))?;
    let t0 = Instant::now();
    let until = t0 + Duration::from_secs(args.seconds);
    let mut pumps = 0u64;
    while Instant::now() < until {
        demo::walk(&region, &viewers, t0.elapsed().as_secs_f32());
        region.pump_viewers();
        for v in &mut viewers {
            v.drain();
        }
        pumps += 1;
        if region.heartbeat_state() != HeartbeatState::Running {
            tracing::error!(region = %region.name(), "heartbeat stopped early");
            break;
        }
        thread::sleep(pump_every);
    }

    let stats = region.heartbeat_stats();
    region.shutdown();
    let mut totals = DemoTotals::default();
    for v in &mut viewers {
        v.drain();
        totals.add(&v.totals);
    }
    tracing::info!(
        region = %region.name(),
        frames = stats.map_or(0, |s| s.frame),
        avg_period_ms = stats.map_or(0.0, |s| s.avg_period_ms),
        pumps,
        entity_updates = totals.entity_updates,
        avatar_updates = totals.avatar_updates,
        avatar_fulls = totals.avatar_fulls,
        animations = totals.animations,
        coarse = totals.coarse,
        groups = region.scene().group_count(),
        avatars = region.scene().avatar_count(),
        "region run complete"
    );
    drop(listener);
    Ok(())
}
