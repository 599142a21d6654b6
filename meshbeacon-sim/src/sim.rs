//! Drives several `NodeRuntime`s over one `Air` in simulated time.

use crate::air::{Air, SimRadio, SimSense};
use crate::config::SimConfig;
use meshbeacon_core::bridge::PAGE_HEADER_SIZE;
use meshbeacon_core::{
    CompanionTransport, FixState, NodeId, NodeRuntime, PageHeader, PositionSnapshot, RxOutcome,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Start of the simulated area, 1e-7 degrees.
const ORIGIN_LAT_E7: i32 = 473_769_000;
const ORIGIN_LON_E7: i32 = 85_417_000;

/// Largest per-tick random-walk step, 1e-7 degrees (~1 m).
const STEP_E7: i32 = 90;

/// Every fourth node has no positioning source and only sends Alive.
const NO_FIX_EVERY: usize = 4;

/// Companion reader that walks the pages of each snapshot in turn.
#[derive(Debug, Default)]
pub struct PagingReader {
    request: (u16, u16),
    pub last_header: Option<PageHeader>,
    pub records_seen: usize,
    pub device_info_len: usize,
}

impl PagingReader {
    fn advance(&mut self) {
        let Some(h) = self.last_header else {
            return;
        };
        let next = h.page_index + 1;
        self.request = if next < h.page_count {
            (h.snapshot_id, next)
        } else {
            (0, 0)
        };
    }
}

impl CompanionTransport for PagingReader {
    fn set_device_info(&mut self, blob: &[u8]) {
        self.device_info_len = blob.len();
    }

    fn set_node_table_response(&mut self, blob: &[u8]) {
        self.last_header = PageHeader::read_from(blob);
        self.records_seen += blob.len().saturating_sub(PAGE_HEADER_SIZE) / meshbeacon_core::RECORD_SIZE;
        self.advance();
    }

    fn node_table_request(&self) -> (u16, u16) {
        self.request
    }
}

struct SimNode {
    runtime: NodeRuntime,
    sense: Option<SimSense>,
    has_gps: bool,
    lat_e7: i32,
    lon_e7: i32,
    battery_pct: u8,
}

pub struct Simulation {
    config: SimConfig,
    nodes: Vec<SimNode>,
    radios: Vec<SimRadio>,
    air: Air,
    rng: StdRng,
    reader: PagingReader,
    now_ms: u64,
    ticks: u64,
    frames_sent: u64,
    frames_applied: u64,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut ids = HashSet::new();
        let mut nodes = Vec::with_capacity(config.nodes);
        for i in 0..config.nodes {
            let id = loop {
                let id = NodeId::new(rng.gen());
                if id.as_u64() != 0 && ids.insert(id) {
                    break id;
                }
            };
            let mut runtime = NodeRuntime::new(id, &config.beacon, 0);
            runtime.device_info_mut().radio_model = "sim".into();
            let sense = config
                .beacon
                .sense_enabled
                .then(|| SimSense::new(config.seed ^ id.as_u64(), config.busy_percent));
            nodes.push(SimNode {
                runtime,
                sense,
                has_gps: i % NO_FIX_EVERY != NO_FIX_EVERY - 1,
                lat_e7: ORIGIN_LAT_E7 + rng.gen_range(-5_000..=5_000),
                lon_e7: ORIGIN_LON_E7 + rng.gen_range(-5_000..=5_000),
                battery_pct: rng.gen_range(50..=100),
            });
        }
        let radios = (0..config.nodes).map(|_| SimRadio::default()).collect();
        let air = Air::new(
            config.seed.wrapping_add(1),
            config.loss_percent,
            config.duplicate_percent,
            config.corrupt_percent,
        );
        Self {
            config,
            nodes,
            radios,
            air,
            rng,
            reader: PagingReader::default(),
            now_ms: 0,
            ticks: 0,
            frames_sent: 0,
            frames_applied: 0,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.runtime.node_id()).collect()
    }

    #[cfg(test)]
    pub fn runtime(&self, index: usize) -> Option<&NodeRuntime> {
        self.nodes.get(index).map(|n| &n.runtime)
    }

    #[cfg(test)]
    pub fn reader(&self) -> &PagingReader {
        &self.reader
    }

    /// Advance simulated time by one tick: move nodes, tick every runtime, then propagate.
    pub fn step(&mut self) {
        self.now_ms += self.config.tick_ms;
        self.ticks += 1;
        let now = self.now_ms;

        for (node, radio) in self.nodes.iter_mut().zip(self.radios.iter_mut()) {
            if node.has_gps {
                node.lat_e7 += self.rng.gen_range(-STEP_E7..=STEP_E7);
                node.lon_e7 += self.rng.gen_range(-STEP_E7..=STEP_E7);
                let snapshot = PositionSnapshot {
                    fix_state: FixState::Fix3D,
                    pos_valid: true,
                    lat_e7: node.lat_e7,
                    lon_e7: node.lon_e7,
                    last_fix_ms: Some(now),
                    sats: Some(self.rng.gen_range(4..=12)),
                };
                node.runtime.set_self_position(&snapshot, now);
            }
            if now % 60_000 < self.config.tick_ms && node.battery_pct > 0 {
                node.battery_pct -= 1;
            }
            node.runtime.set_battery_pct(Some(node.battery_pct));

            let sense = node.sense.as_mut().map(|s| s as &mut dyn meshbeacon_core::ChannelSense);
            let report = node.runtime.tick(now, radio, sense);
            if let Some(frame) = report.sent {
                self.frames_sent += 1;
                log::trace!(
                    "{} tx {} seq={}",
                    node.runtime.node_id().short_id(),
                    frame.kind.label(),
                    frame.seq
                );
            }
            for outcome in &report.received {
                match outcome {
                    RxOutcome::Applied { .. } => self.frames_applied += 1,
                    RxOutcome::Dropped(e) => log::debug!(
                        "{} dropped frame: {}",
                        node.runtime.node_id().short_id(),
                        e
                    ),
                    _ => {}
                }
            }
        }

        if let Some(first) = self.nodes.first_mut() {
            first.runtime.publish(now, &mut self.reader);
        }
        self.air.propagate(&mut self.radios);

        let every = self.config.dump_every_ticks;
        if every > 0 && self.ticks % every == 0 {
            self.dump();
        }
    }

    /// Log each node's view of its peers.
    pub fn dump(&self) {
        for node in &self.nodes {
            let table = node.runtime.table();
            log::info!(
                "node {} t={}s peers={} stats={:?}",
                node.runtime.node_id().short_id(),
                self.now_ms / 1000,
                table.size().saturating_sub(1),
                node.runtime.stats()
            );
            let mut i = 0;
            while let Some(line) = table.get_peer_dump_line(self.now_ms, i) {
                log::info!("  {}", line);
                i += 1;
            }
        }
    }

    pub fn summary(&self) -> String {
        let air = self.air.stats();
        let overflowed: u64 = self.radios.iter().map(|r| r.overflowed).sum();
        format!(
            "{} ticks ({} s simulated): {} frames sent, {} applied; air sent={} delivered={} lost={} dup={} corrupt={} overflow={}; reader records={} snapshot={:?} info_bytes={}",
            self.ticks,
            self.now_ms / 1000,
            self.frames_sent,
            self.frames_applied,
            air.sent,
            air.delivered,
            air.lost,
            air.duplicated,
            air.corrupted,
            overflowed,
            self.reader.records_seen,
            self.reader.last_header.map(|h| h.snapshot_id),
            self.reader.device_info_len
        )
    }
}
