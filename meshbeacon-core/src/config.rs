//! Beacon tuning. Hosts deserialize this from their own config source (see `meshbeacon-sim`).

use serde::Deserialize;

/// Cadence, table and send-policy settings for one node. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconConfig {
    /// Minimum time between position beacons (default 18 s).
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Silence override; a beacon is sent at least this often. 0 disables (default 72 s).
    #[serde(default = "default_max_silence_ms")]
    pub max_silence_ms: u64,
    /// Expected peer reporting interval for staleness, seconds. 0 disables (default 72).
    #[serde(default = "default_expected_interval_s")]
    pub expected_interval_s: u16,
    #[serde(default = "default_table_capacity")]
    pub table_capacity: usize,
    /// Upper bound of the uniform send jitter (default 500 ms).
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Listen before talk when the radio supports it.
    #[serde(default)]
    pub sense_enabled: bool,
    #[serde(default = "default_sense_timeout_ms")]
    pub sense_timeout_ms: u32,
    /// Max `recv` calls per tick (default 4).
    #[serde(default = "default_rx_per_tick")]
    pub rx_per_tick: usize,
    /// Send an operational frame after every N cores. 0 disables (default 4).
    #[serde(default = "default_operational_every_n_cores")]
    pub operational_every_n_cores: u32,
    /// Informative frame period. 0 disables (default 5 min).
    #[serde(default = "default_info_interval_ms")]
    pub info_interval_ms: u64,
    /// Minimum displacement for a distance-triggered position commit (default 25 m).
    #[serde(default = "default_min_distance_m")]
    pub min_distance_m: f64,
    #[serde(default)]
    pub hw_profile_id: Option<u16>,
    #[serde(default)]
    pub fw_version_id: Option<u16>,
}

fn default_min_interval_ms() -> u64 {
    18_000
}
fn default_max_silence_ms() -> u64 {
    72_000
}
fn default_expected_interval_s() -> u16 {
    72
}
fn default_table_capacity() -> usize {
    crate::table::DEFAULT_CAPACITY
}
fn default_jitter_max_ms() -> u64 {
    500
}
fn default_backoff_base_ms() -> u64 {
    crate::scheduler::DEFAULT_BACKOFF_BASE_MS
}
fn default_backoff_max_ms() -> u64 {
    crate::scheduler::DEFAULT_BACKOFF_MAX_MS
}
fn default_sense_timeout_ms() -> u32 {
    50
}
fn default_rx_per_tick() -> usize {
    4
}
fn default_operational_every_n_cores() -> u32 {
    4
}
fn default_info_interval_ms() -> u64 {
    300_000
}
fn default_min_distance_m() -> f64 {
    crate::self_update::DEFAULT_MIN_DISTANCE_M
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_silence_ms: default_max_silence_ms(),
            expected_interval_s: default_expected_interval_s(),
            table_capacity: default_table_capacity(),
            jitter_max_ms: default_jitter_max_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            sense_enabled: false,
            sense_timeout_ms: default_sense_timeout_ms(),
            rx_per_tick: default_rx_per_tick(),
            operational_every_n_cores: default_operational_every_n_cores(),
            info_interval_ms: default_info_interval_ms(),
            min_distance_m: default_min_distance_m(),
            hw_profile_id: None,
            fw_version_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("table_capacity must be at least 1")]
    ZeroCapacity,
    #[error("max_silence_ms ({max_silence_ms}) is below min_interval_ms ({min_interval_ms})")]
    SilenceBelowInterval {
        min_interval_ms: u64,
        max_silence_ms: u64,
    },
    #[error("backoff_base_ms ({base}) exceeds backoff_max_ms ({max})")]
    BackoffRange { base: u64, max: u64 },
    #[error("min_distance_m must be finite and non-negative")]
    BadDistance,
}

impl BeaconConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_silence_ms > 0 && self.max_silence_ms < self.min_interval_ms {
            return Err(ConfigError::SilenceBelowInterval {
                min_interval_ms: self.min_interval_ms,
                max_silence_ms: self.max_silence_ms,
            });
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::BackoffRange {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        if !self.min_distance_m.is_finite() || self.min_distance_m < 0.0 {
            return Err(ConfigError::BadDistance);
        }
        Ok(())
    }

    /// Max silence in the 10 s units carried by Info frames, saturating.
    pub fn max_silence_10s(&self) -> u8 {
        (self.max_silence_ms / 10_000).min(u8::MAX as u64) as u8
    }
}
