// meshbeacon-sim: several beaconing nodes over a shared lossy in-memory channel.

mod air;
mod config;
mod sim;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Run several beaconing nodes over a simulated lossy channel.
#[derive(Parser, Debug)]
#[command(name = "meshbeacon-sim", version, about)]
struct Args {
    /// TOML config file; otherwise the usual search paths are tried.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Stop after this many ticks (0 runs until interrupted).
    #[arg(short = 'n', long, value_name = "N")]
    ticks: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(n) = args.ticks {
        cfg.ticks = n;
    }
    log::info!(
        "simulating {} nodes, tick {} ms, loss {}%, dup {}%, seed {}",
        cfg.nodes,
        cfg.tick_ms,
        cfg.loss_percent,
        cfg.duplicate_percent,
        cfg.seed
    );

    let max_ticks = cfg.ticks;
    let pace = Duration::from_millis(cfg.pace_ms);
    let mut simulation = sim::Simulation::new(cfg);
    for id in simulation.node_ids() {
        log::info!("node {} short id {}", id, id.short_id());
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let mut pacer = (!pace.is_zero()).then(|| tokio::time::interval(pace));
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            if max_ticks > 0 && simulation.ticks() >= max_ticks {
                break;
            }
            tokio::select! {
                res = &mut shutdown => {
                    res?;
                    log::info!("shutdown requested at t={} ms", simulation.now_ms());
                    break;
                }
                _ = pace_tick(pacer.as_mut()) => simulation.step(),
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    simulation.dump();
    log::info!("{}", simulation.summary());
    Ok(())
}

/// Next real-time tick, or just a yield when unpaced.
async fn pace_tick(pacer: Option<&mut tokio::time::Interval>) {
    match pacer {
        Some(interval) => {
            interval.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
