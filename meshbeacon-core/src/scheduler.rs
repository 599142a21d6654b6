//! Send policy: jittered first attempt, optional channel sense, exponential retry backoff.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hal::ChannelSense;

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 200;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2000;

/// State machine for one pending payload: idle, or pending with a next attempt time.
pub struct SendPolicy {
    rng: StdRng,
    jitter_max_ms: u64,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    backoff_ms: u64,
    sense_enabled: bool,
    next_attempt_ms: Option<u64>,
}

impl SendPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            jitter_max_ms: 0,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_ms: 0,
            sense_enabled: false,
            next_attempt_ms: None,
        }
    }

    pub fn set_jitter_ms(&mut self, jitter_max_ms: u64) {
        self.jitter_max_ms = jitter_max_ms;
    }

    pub fn set_backoff_ms(&mut self, base_ms: u64, max_ms: u64) {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms.max(base_ms);
    }

    pub fn enable_sense(&mut self, enabled: bool) {
        self.sense_enabled = enabled;
    }

    pub fn has_pending(&self) -> bool {
        self.next_attempt_ms.is_some()
    }

    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms
    }

    pub fn next_attempt_ms(&self) -> Option<u64> {
        self.next_attempt_ms
    }

    pub fn ready_to_attempt(&self, now_ms: u64) -> bool {
        self.next_attempt_ms.is_some_and(|t| now_ms >= t)
    }

    pub fn should_sense(&self, sense: Option<&dyn ChannelSense>) -> bool {
        self.sense_enabled && sense.is_some_and(|s| s.can_sense())
    }

    /// A payload became ready: first attempt after uniform jitter in `[0, jitter_max]`.
    pub fn on_payload_built(&mut self, now_ms: u64) {
        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.jitter_max_ms)
        };
        self.next_attempt_ms = Some(now_ms.saturating_add(jitter));
    }

    /// Busy or error on sense: defer by the grown backoff without consuming a send.
    pub fn on_channel_busy(&mut self, now_ms: u64) {
        self.increase_backoff();
        self.next_attempt_ms = Some(now_ms.saturating_add(self.backoff_ms));
    }

    pub fn on_send_result(&mut self, ok: bool, now_ms: u64) {
        if ok {
            self.next_attempt_ms = None;
            self.backoff_ms = 0;
            return;
        }
        self.increase_backoff();
        self.next_attempt_ms = Some(now_ms.saturating_add(self.backoff_ms));
        log::debug!("send failed, retry in {} ms", self.backoff_ms);
    }

    /// Drop the pending payload without sending.
    pub fn cancel(&mut self) {
        self.next_attempt_ms = None;
    }

    fn increase_backoff(&mut self) {
        self.backoff_ms = if self.backoff_ms == 0 {
            self.backoff_base_ms
        } else {
            self.backoff_ms.saturating_mul(2).min(self.backoff_max_ms)
        };
    }
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}
