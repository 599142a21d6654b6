//! Load simulator config from file and environment.

use anyhow::Context;
use meshbeacon_core::BeaconConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Simulator configuration. File: `--config <path>`, else ~/.config/meshbeacon/config.toml
/// or /etc/meshbeacon/config.toml. Env overrides: MESHBEACON_NODES, MESHBEACON_TICK_MS,
/// MESHBEACON_TICKS, MESHBEACON_LOSS_PERCENT, MESHBEACON_SEED.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Number of simulated nodes (default 4).
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Simulated time per tick (default 100 ms).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Stop after this many ticks. 0 runs until Ctrl+C (default 0).
    #[serde(default)]
    pub ticks: u64,
    /// Real-time pacing of ticks; 0 runs as fast as possible (default 0).
    #[serde(default)]
    pub pace_ms: u64,
    /// Chance a receiver misses a frame (default 10).
    #[serde(default = "default_loss_percent")]
    pub loss_percent: u8,
    /// Chance a receiver gets a frame twice (default 5).
    #[serde(default = "default_duplicate_percent")]
    pub duplicate_percent: u8,
    /// Chance a delivered frame has one byte flipped (default 0).
    #[serde(default)]
    pub corrupt_percent: u8,
    /// Chance the channel reads busy when sensed (default 0).
    #[serde(default)]
    pub busy_percent: u8,
    /// Seed for the air model; node ids are derived from it too.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Log each node's peer table every N ticks. 0 disables (default 600).
    #[serde(default = "default_dump_every_ticks")]
    pub dump_every_ticks: u64,
    #[serde(default)]
    pub beacon: BeaconConfig,
}

fn default_nodes() -> usize {
    4
}
fn default_tick_ms() -> u64 {
    100
}
fn default_loss_percent() -> u8 {
    10
}
fn default_duplicate_percent() -> u8 {
    5
}
fn default_seed() -> u64 {
    0x5EED
}
fn default_dump_every_ticks() -> u64 {
    600
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            tick_ms: default_tick_ms(),
            ticks: 0,
            pace_ms: 0,
            loss_percent: default_loss_percent(),
            duplicate_percent: default_duplicate_percent(),
            corrupt_percent: 0,
            busy_percent: 0,
            seed: default_seed(),
            dump_every_ticks: default_dump_every_ticks(),
            beacon: BeaconConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.nodes >= 1, "nodes must be at least 1");
        anyhow::ensure!(self.tick_ms >= 1, "tick_ms must be at least 1");
        for (name, pct) in [
            ("loss_percent", self.loss_percent),
            ("duplicate_percent", self.duplicate_percent),
            ("corrupt_percent", self.corrupt_percent),
            ("busy_percent", self.busy_percent),
        ] {
            anyhow::ensure!(pct <= 100, "{} must be 0..=100, got {}", name, pct);
        }
        self.beacon.validate().context("invalid [beacon] section")?;
        Ok(())
    }
}

/// Load config: explicit path (must exist and parse), else the first default path found,
/// else defaults; then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<SimConfig> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => SimConfig::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    c.validate()?;
    Ok(c)
}

fn read_file(path: &Path) -> anyhow::Result<SimConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let c = toml::from_str::<SimConfig>(&s).with_context(|| format!("parsing {}", path.display()))?;
    log::info!("config loaded from {}", path.display());
    Ok(c)
}

fn apply_env(c: &mut SimConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("MESHBEACON_NODES").and_then(|s| s.parse().ok()) {
        c.nodes = n;
    }
    if let Some(n) = var("MESHBEACON_TICK_MS").and_then(|s| s.parse().ok()) {
        c.tick_ms = n;
    }
    if let Some(n) = var("MESHBEACON_TICKS").and_then(|s| s.parse().ok()) {
        c.ticks = n;
    }
    if let Some(n) = var("MESHBEACON_LOSS_PERCENT").and_then(|s| s.parse().ok()) {
        c.loss_percent = n;
    }
    if let Some(n) = var("MESHBEACON_SEED").and_then(|s| s.parse().ok()) {
        c.seed = n;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/meshbeacon/config.toml"));
    }
    out.push(PathBuf::from("/etc/meshbeacon/config.toml"));
    out
}
