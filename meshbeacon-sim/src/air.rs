//! Shared in-memory broadcast channel with loss, duplication and corruption.

use meshbeacon_core::{ChannelSense, Radio, SenseResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Inbox bound per node; oldest frames are dropped past it.
const INBOX_LIMIT: usize = 64;

/// One node's radio. Sends go to `outbox` until the air delivers them.
#[derive(Debug, Default)]
pub struct SimRadio {
    inbox: VecDeque<(Vec<u8>, i8)>,
    outbox: Vec<Vec<u8>>,
    last_rssi: i8,
    pub overflowed: u64,
}

impl SimRadio {
    fn push(&mut self, frame: Vec<u8>, rssi: i8) {
        if self.inbox.len() >= INBOX_LIMIT {
            self.inbox.pop_front();
            self.overflowed += 1;
        }
        self.inbox.push_back((frame, rssi));
    }
}

impl Radio for SimRadio {
    fn send(&mut self, frame: &[u8]) -> bool {
        self.outbox.push(frame.to_vec());
        true
    }

    fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        let (frame, rssi) = self.inbox.pop_front()?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        self.last_rssi = rssi;
        Some(n)
    }

    fn last_rssi(&self) -> i8 {
        self.last_rssi
    }
}

/// Carrier sense that reports busy with a fixed probability.
pub struct SimSense {
    rng: StdRng,
    busy_percent: u8,
}

impl SimSense {
    pub fn new(seed: u64, busy_percent: u8) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            busy_percent,
        }
    }
}

impl ChannelSense for SimSense {
    fn can_sense(&self) -> bool {
        true
    }

    fn sense(&mut self, _timeout_ms: u32) -> SenseResult {
        if self.rng.gen_range(0..100) < self.busy_percent {
            SenseResult::Busy
        } else {
            SenseResult::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AirStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub duplicated: u64,
    pub corrupted: u64,
}

pub struct Air {
    rng: StdRng,
    loss_percent: u8,
    duplicate_percent: u8,
    corrupt_percent: u8,
    stats: AirStats,
}

impl Air {
    pub fn new(seed: u64, loss_percent: u8, duplicate_percent: u8, corrupt_percent: u8) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            loss_percent,
            duplicate_percent,
            corrupt_percent,
            stats: AirStats::default(),
        }
    }

    pub fn stats(&self) -> AirStats {
        self.stats
    }

    /// Move every radio's outbox to all other radios' inboxes.
    pub fn propagate(&mut self, radios: &mut [SimRadio]) {
        for from in 0..radios.len() {
            let outbox = std::mem::take(&mut radios[from].outbox);
            for frame in outbox {
                self.stats.sent += 1;
                for (to, radio) in radios.iter_mut().enumerate() {
                    if to != from {
                        self.deliver(&frame, radio);
                    }
                }
            }
        }
    }

    fn deliver(&mut self, frame: &[u8], radio: &mut SimRadio) {
        if self.chance(self.loss_percent) {
            self.stats.lost += 1;
            return;
        }
        let rssi = self.rng.gen_range(-120i8..=-40);
        let mut copy = frame.to_vec();
        if !copy.is_empty() && self.chance(self.corrupt_percent) {
            let i = self.rng.gen_range(0..copy.len());
            copy[i] ^= 1 << self.rng.gen_range(0..8);
            self.stats.corrupted += 1;
        }
        if self.chance(self.duplicate_percent) {
            radio.push(copy.clone(), rssi);
            self.stats.duplicated += 1;
        }
        radio.push(copy, rssi);
        self.stats.delivered += 1;
    }

    fn chance(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.gen_range(0..100) < percent
    }
}
