//! Cadence engine: decides which frame to build each tick and dispatches received frames
//! into the peer table (Tail-1 linkage gate, per-kind dedup).

use crate::codec::{self, AliveFields, CoreFields, InfoFields, Prefix, Tail1Fields, Tail2Fields};
use crate::identity::NodeId;
use crate::protocol::PacketKind;
use crate::table::{ApplyResult, PeerTable, Position, RemoteUpdate};
use crate::wire::{self, FrameError, Packet};

/// What we know about ourselves at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfFields {
    pub node_id: NodeId,
    /// `None` when there is no valid fix.
    pub position: Option<Position>,
}

/// A frame written into the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxFrame {
    pub kind: PacketKind,
    pub seq: u16,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualitySample {
    pub pos_flags: Option<u8>,
    pub sats: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationalSample {
    pub battery_pct: Option<u8>,
    pub uptime_s: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InformativeSample {
    pub max_silence_10s: Option<u8>,
    pub hw_profile_id: Option<u16>,
    pub fw_version_id: Option<u16>,
}

/// Result of ingesting one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    Applied { kind: PacketKind, node_id: NodeId, seq: u16 },
    /// Repeated auxiliary frame, or a Core/Alive whose seq is not newer than the last accepted.
    Duplicate { kind: PacketKind, node_id: NodeId },
    /// Tail-1 whose back-reference does not match the stored Core seq.
    Unlinked { node_id: NodeId },
    /// Peer table full with no stale victim.
    Refused { node_id: NodeId },
    /// Our own frame heard back.
    OwnFrame,
    /// Undecodable frame.
    Dropped(FrameError),
}

impl RxOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RxOutcome::Applied { .. })
    }
}

pub struct CadenceEngine {
    min_interval_ms: u64,
    max_silence_ms: u64,
    seq: u16,
    last_tx_ms: Option<u64>,
    last_core_seq: Option<u16>,
}

impl CadenceEngine {
    /// `max_silence_ms` of 0 disables the silence override.
    pub fn new(min_interval_ms: u64, max_silence_ms: u64) -> Self {
        Self {
            min_interval_ms,
            max_silence_ms,
            seq: 0,
            last_tx_ms: None,
            last_core_seq: None,
        }
    }

    /// Seq of the most recently built frame of any kind.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn last_core_seq(&self) -> Option<u16> {
        self.last_core_seq
    }

    pub fn last_tx_ms(&self) -> Option<u64> {
        self.last_tx_ms
    }

    /// Build the primary frame for this tick, if due. Core when the position is valid;
    /// Alive only on the silence path. Consumes one seq and resets the elapsed reference.
    pub fn build_tx(
        &mut self,
        now_ms: u64,
        self_fields: &SelfFields,
        permission: bool,
        out: &mut [u8],
    ) -> Option<TxFrame> {
        let elapsed = self
            .last_tx_ms
            .map_or(now_ms, |t| now_ms.saturating_sub(t));
        let interval_due = elapsed >= self.min_interval_ms && permission;
        let silence_due = self.max_silence_ms > 0 && elapsed >= self.max_silence_ms;
        if !interval_due && !silence_due {
            return None;
        }
        let next_seq = self.seq.wrapping_add(1);
        let prefix = Prefix::new(self_fields.node_id, next_seq);
        let (kind, written) = match self_fields.position {
            Some(pos) => {
                let fields = CoreFields {
                    prefix,
                    lat_e7: pos.lat_e7,
                    lon_e7: pos.lon_e7,
                };
                (PacketKind::Core, codec::core::encode(&fields, out))
            }
            None if silence_due => {
                let fields = AliveFields {
                    prefix,
                    status: None,
                };
                (PacketKind::Alive, codec::alive::encode(&fields, out))
            }
            None => return None,
        };
        let len = match written {
            Ok(len) => len,
            Err(e) => {
                log::warn!("{} encode failed: {}", kind.label(), e);
                return None;
            }
        };
        self.seq = next_seq;
        self.last_tx_ms = Some(now_ms);
        if kind == PacketKind::Core {
            self.last_core_seq = Some(next_seq);
        }
        Some(TxFrame {
            kind,
            seq: next_seq,
            len,
        })
    }

    /// Tail-1 qualifying the last Core we built. `None` if no Core was built yet.
    pub fn build_tail1(
        &mut self,
        node_id: NodeId,
        sample: &QualitySample,
        out: &mut [u8],
    ) -> Option<TxFrame> {
        let ref_core_seq = self.last_core_seq?;
        let seq = self.seq.wrapping_add(1);
        let fields = Tail1Fields {
            prefix: Prefix::new(node_id, seq),
            ref_core_seq,
            pos_flags: sample.pos_flags,
            sats: sample.sats,
        };
        let written = codec::tail1::encode(&fields, out);
        self.commit_aux(PacketKind::Tail1, seq, written)
    }

    pub fn build_operational(
        &mut self,
        node_id: NodeId,
        sample: &OperationalSample,
        out: &mut [u8],
    ) -> Option<TxFrame> {
        let seq = self.seq.wrapping_add(1);
        let fields = Tail2Fields {
            prefix: Prefix::new(node_id, seq),
            battery_pct: sample.battery_pct,
            uptime_s: sample.uptime_s,
        };
        let written = codec::tail2::encode(&fields, out);
        self.commit_aux(PacketKind::Tail2, seq, written)
    }

    pub fn build_informative(
        &mut self,
        node_id: NodeId,
        sample: &InformativeSample,
        out: &mut [u8],
    ) -> Option<TxFrame> {
        let seq = self.seq.wrapping_add(1);
        let fields = InfoFields {
            prefix: Prefix::new(node_id, seq),
            max_silence_10s: sample.max_silence_10s,
            hw_profile_id: sample.hw_profile_id,
            fw_version_id: sample.fw_version_id,
        };
        let written = codec::info::encode(&fields, out);
        self.commit_aux(PacketKind::Info, seq, written)
    }

    fn commit_aux(
        &mut self,
        kind: PacketKind,
        seq: u16,
        written: Result<usize, codec::EncodeError>,
    ) -> Option<TxFrame> {
        match written {
            Ok(len) => {
                self.seq = seq;
                Some(TxFrame { kind, seq, len })
            }
            Err(e) => {
                log::warn!("{} encode failed: {}", kind.label(), e);
                None
            }
        }
    }

    /// Decode one received frame and apply it to `table`. Every failure is a silent drop.
    pub fn on_rx(
        &self,
        now_ms: u64,
        frame: &[u8],
        rssi: i8,
        table: &mut PeerTable,
    ) -> RxOutcome {
        let packet = match wire::decode_frame(frame) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("rx drop: {}", e);
                return RxOutcome::Dropped(e);
            }
        };
        let kind = packet.kind();
        let Prefix { node_id, seq } = *packet.prefix();
        if table.self_entry().is_some_and(|s| s.node_id == node_id) {
            return RxOutcome::OwnFrame;
        }
        let result = match packet {
            Packet::Core(f) => table.upsert_remote(
                &RemoteUpdate {
                    node_id,
                    position: Some(Position {
                        lat_e7: f.lat_e7,
                        lon_e7: f.lon_e7,
                    }),
                    pos_age_s: 0,
                    rssi,
                    seq,
                },
                now_ms,
            ),
            Packet::Alive(_) => table.upsert_remote(
                &RemoteUpdate {
                    node_id,
                    position: None,
                    pos_age_s: 0,
                    rssi,
                    seq,
                },
                now_ms,
            ),
            Packet::Tail1(f) => table.apply_tail1(&f, rssi, now_ms),
            Packet::Tail2(f) => table.apply_tail2(&f, rssi, now_ms),
            Packet::Info(f) => table.apply_info(&f, rssi, now_ms),
        };
        let outcome = match result {
            ApplyResult::Applied => RxOutcome::Applied {
                kind,
                node_id,
                seq,
            },
            ApplyResult::Duplicate => RxOutcome::Duplicate { kind, node_id },
            ApplyResult::Unlinked => RxOutcome::Unlinked { node_id },
            ApplyResult::Refused => RxOutcome::Refused { node_id },
            ApplyResult::Ignored => RxOutcome::OwnFrame,
        };
        log::trace!("rx {} from {} seq={}: {:?}", kind.label(), node_id, seq, outcome);
        outcome
    }
}
