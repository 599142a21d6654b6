//! Owned node runtime: one object per node holding the peer table, cadence engine, send policy
//! and position-commit policy. The host calls `tick` at its own cadence.

use crate::bridge::{self, DeviceInfo};
use crate::cadence::{
    CadenceEngine, InformativeSample, OperationalSample, QualitySample, RxOutcome, SelfFields,
    TxFrame,
};
use crate::config::BeaconConfig;
use crate::hal::{ChannelSense, CompanionTransport, FixState, PositionSnapshot, Radio, SenseResult};
use crate::identity::NodeId;
use crate::protocol::{PacketKind, MAX_FRAME_SIZE};
use crate::scheduler::SendPolicy;
use crate::self_update::SelfUpdatePolicy;
use crate::table::{PeerTable, Position};

/// Minimum spacing of companion publishes.
pub const PUBLISH_INTERVAL_MS: u64 = 1000;

const POS_FLAG_VALID: u8 = 0x01;
const POS_FLAG_3D: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub tx_ok: u32,
    pub tx_err: u32,
    pub rx_ok: u32,
    pub rx_duplicate: u32,
    pub rx_dropped: u32,
    pub sense_deferrals: u32,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: Option<TxFrame>,
    pub received: Vec<RxOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    Tail1(QualitySample),
    Operational,
    Informative,
}

impl FollowUp {
    /// Slot index doubles as priority; lower is sent first.
    fn slot(&self) -> usize {
        match self {
            FollowUp::Tail1(_) => 0,
            FollowUp::Operational => 1,
            FollowUp::Informative => 2,
        }
    }
}

/// One slot per follow-up kind; a newer entry replaces the older one in its slot.
#[derive(Debug, Default)]
struct FollowUpSlots([Option<FollowUp>; 3]);

impl FollowUpSlots {
    fn push(&mut self, item: FollowUp) {
        self.0[item.slot()] = Some(item);
    }

    fn pop(&mut self) -> Option<FollowUp> {
        self.0.iter_mut().find_map(Option::take)
    }

    fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

struct Pending {
    buf: [u8; MAX_FRAME_SIZE],
    frame: TxFrame,
}

pub struct NodeRuntime {
    node_id: NodeId,
    config: BeaconConfig,
    table: PeerTable,
    cadence: CadenceEngine,
    policy: SendPolicy,
    self_update: SelfUpdatePolicy,
    device_info: DeviceInfo,
    position: Option<Position>,
    quality: Option<QualitySample>,
    permission: bool,
    pending: Option<Pending>,
    followups: FollowUpSlots,
    cores_since_operational: u32,
    last_info_ms: Option<u64>,
    last_publish_ms: Option<u64>,
    started_ms: u64,
    battery_pct: Option<u8>,
    stats: RuntimeStats,
}

impl NodeRuntime {
    pub fn new(node_id: NodeId, config: &BeaconConfig, now_ms: u64) -> Self {
        let mut table = PeerTable::new(config.table_capacity);
        table.set_expected_interval_s(config.expected_interval_s);
        table.init_self(node_id, now_ms);

        let mut policy = SendPolicy::new(node_id.as_u64() ^ now_ms);
        policy.set_jitter_ms(config.jitter_max_ms);
        policy.set_backoff_ms(config.backoff_base_ms, config.backoff_max_ms);
        policy.enable_sense(config.sense_enabled);

        let mut self_update = SelfUpdatePolicy::new(config.min_interval_ms, config.max_silence_ms);
        self_update.set_min_distance_m(config.min_distance_m);

        log::info!(
            "node {} (short id {}) up: min interval {} ms, max silence {} ms",
            node_id,
            node_id.short_id(),
            config.min_interval_ms,
            config.max_silence_ms
        );

        Self {
            node_id,
            config: config.clone(),
            table,
            cadence: CadenceEngine::new(config.min_interval_ms, config.max_silence_ms),
            policy,
            self_update,
            device_info: DeviceInfo::new(node_id, env!("CARGO_PKG_VERSION")),
            position: None,
            quality: None,
            permission: false,
            pending: None,
            followups: FollowUpSlots::default(),
            cores_since_operational: 0,
            last_info_ms: None,
            last_publish_ms: None,
            started_ms: now_ms,
            battery_pct: None,
            stats: RuntimeStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn table(&self) -> &PeerTable {
        &self.table
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    pub fn device_info_mut(&mut self) -> &mut DeviceInfo {
        &mut self.device_info
    }

    pub fn set_battery_pct(&mut self, pct: Option<u8>) {
        self.battery_pct = pct;
    }

    /// Push the latest position sample. A committed update grants one interval-path beacon.
    pub fn set_self_position(&mut self, snapshot: &PositionSnapshot, now_ms: u64) {
        if !snapshot.has_fix() {
            if self.position.take().is_some() {
                log::debug!("self position lost");
            }
            self.quality = None;
            self.table.clear_self_position();
            self.self_update.reset();
            return;
        }
        let position = Position {
            lat_e7: snapshot.lat_e7,
            lon_e7: snapshot.lon_e7,
        };
        self.position = Some(position);
        self.quality = Some(QualitySample {
            pos_flags: Some(pos_flags(snapshot.fix_state)),
            sats: snapshot.sats,
        });
        let decision = self.self_update.evaluate(now_ms, snapshot);
        if decision.should_commit() {
            self.self_update.commit(now_ms, snapshot);
            self.table
                .update_self_position(position, snapshot.age_s(now_ms), now_ms);
            self.permission = true;
            log::debug!(
                "self position commit ({:?}, {:.1} m)",
                decision.reason,
                decision.distance_m
            );
        }
    }

    /// One cooperative step: at most one send, then up to `rx_per_tick` receives.
    pub fn tick<R: Radio + ?Sized>(
        &mut self,
        now_ms: u64,
        radio: &mut R,
        sense: Option<&mut dyn ChannelSense>,
    ) -> TickReport {
        let mut report = TickReport::default();
        if self.pending.is_none() {
            self.prepare(now_ms);
        }
        if self.policy.ready_to_attempt(now_ms) {
            report.sent = self.attempt(now_ms, radio, sense);
        }
        for _ in 0..self.config.rx_per_tick {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            let Some(n) = radio.recv(&mut buf) else {
                break;
            };
            let rssi = radio.last_rssi();
            let outcome = self
                .cadence
                .on_rx(now_ms, &buf[..n.min(buf.len())], rssi, &mut self.table);
            match &outcome {
                RxOutcome::Applied { .. } => self.stats.rx_ok += 1,
                RxOutcome::Duplicate { .. } => self.stats.rx_duplicate += 1,
                _ => self.stats.rx_dropped += 1,
            }
            report.received.push(outcome);
        }
        report
    }

    /// Publish device info and the requested table page, at most once per second.
    pub fn publish<T: CompanionTransport + ?Sized>(&mut self, now_ms: u64, transport: &mut T) -> bool {
        if self
            .last_publish_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < PUBLISH_INTERVAL_MS)
        {
            return false;
        }
        self.last_publish_ms = Some(now_ms);
        bridge::publish(now_ms, &self.device_info, &mut self.table, transport);
        true
    }

    /// Build the next frame: the primary beacon if due, otherwise the highest-priority follow-up.
    fn prepare(&mut self, now_ms: u64) {
        let mut pending = Pending {
            buf: [0u8; MAX_FRAME_SIZE],
            frame: TxFrame {
                kind: PacketKind::Core,
                seq: 0,
                len: 0,
            },
        };
        let me = SelfFields {
            node_id: self.node_id,
            position: self.position,
        };
        let built = match self
            .cadence
            .build_tx(now_ms, &me, self.permission, &mut pending.buf)
        {
            Some(frame) => {
                self.permission = false;
                self.after_primary(&frame);
                Some(frame)
            }
            None => {
                self.schedule_info(now_ms);
                self.build_followup(now_ms, &mut pending.buf)
            }
        };
        if let Some(frame) = built {
            pending.frame = frame;
            self.pending = Some(pending);
            self.policy.on_payload_built(now_ms);
        }
    }

    fn after_primary(&mut self, frame: &TxFrame) {
        if frame.kind != PacketKind::Core {
            return;
        }
        if let Some(q) = self.quality {
            self.followups.push(FollowUp::Tail1(q));
        }
        self.cores_since_operational += 1;
        let every = self.config.operational_every_n_cores;
        if every > 0 && self.cores_since_operational >= every {
            self.cores_since_operational = 0;
            self.followups.push(FollowUp::Operational);
        }
    }

    fn schedule_info(&mut self, now_ms: u64) {
        let interval = self.config.info_interval_ms;
        if interval == 0 {
            return;
        }
        let due = self
            .last_info_ms
            .map_or(true, |t| now_ms.saturating_sub(t) >= interval);
        if due {
            self.last_info_ms = Some(now_ms);
            self.followups.push(FollowUp::Informative);
        }
    }

    fn build_followup(&mut self, now_ms: u64, buf: &mut [u8]) -> Option<TxFrame> {
        while !self.followups.is_empty() {
            let item = self.followups.pop()?;
            let built = match item {
                FollowUp::Tail1(q) => self.cadence.build_tail1(self.node_id, &q, buf),
                FollowUp::Operational => {
                    let sample = OperationalSample {
                        battery_pct: self.battery_pct,
                        uptime_s: Some((now_ms.saturating_sub(self.started_ms) / 1000) as u32),
                    };
                    self.cadence.build_operational(self.node_id, &sample, buf)
                }
                FollowUp::Informative => {
                    let sample = InformativeSample {
                        max_silence_10s: Some(self.config.max_silence_10s()),
                        hw_profile_id: self.config.hw_profile_id,
                        fw_version_id: self.config.fw_version_id,
                    };
                    self.cadence.build_informative(self.node_id, &sample, buf)
                }
            };
            if built.is_some() {
                return built;
            }
        }
        None
    }

    fn attempt<R: Radio + ?Sized>(
        &mut self,
        now_ms: u64,
        radio: &mut R,
        sense: Option<&mut dyn ChannelSense>,
    ) -> Option<TxFrame> {
        let Some(pending) = self.pending.as_ref() else {
            self.policy.cancel();
            return None;
        };
        if let Some(s) = sense {
            if self.policy.should_sense(Some(&*s)) {
                match s.sense(self.config.sense_timeout_ms) {
                    SenseResult::Idle | SenseResult::Unsupported => {}
                    SenseResult::Busy | SenseResult::Error => {
                        self.policy.on_channel_busy(now_ms);
                        self.stats.sense_deferrals += 1;
                        log::debug!("channel busy, deferring {}", pending.frame.kind.label());
                        return None;
                    }
                }
            }
        }
        let frame = pending.frame;
        let ok = radio.send(&pending.buf[..frame.len]);
        self.policy.on_send_result(ok, now_ms);
        if !ok {
            self.stats.tx_err += 1;
            log::warn!("{} seq={} send failed", frame.kind.label(), frame.seq);
            return None;
        }
        self.pending = None;
        self.stats.tx_ok += 1;
        self.table.touch_self(now_ms);
        self.table.set_self_seq(frame.seq);
        log::debug!("tx {} seq={} len={}", frame.kind.label(), frame.seq, frame.len);
        Some(frame)
    }
}

fn pos_flags(fix: FixState) -> u8 {
    match fix {
        FixState::NoFix => 0,
        FixState::Fix2D => POS_FLAG_VALID,
        FixState::Fix3D => POS_FLAG_VALID | POS_FLAG_3D,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{self, Packet};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct LoopRadio {
        sent: Vec<Vec<u8>>,
        inbox: VecDeque<Vec<u8>>,
        fail_sends: u32,
    }

    impl Radio for LoopRadio {
        fn send(&mut self, frame: &[u8]) -> bool {
            if self.fail_sends > 0 {
                self.fail_sends -= 1;
                return false;
            }
            self.sent.push(frame.to_vec());
            true
        }
        fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
            let f = self.inbox.pop_front()?;
            buf[..f.len()].copy_from_slice(&f);
            Some(f.len())
        }
        fn last_rssi(&self) -> i8 {
            -72
        }
    }

    struct BusySense(u32);

    impl ChannelSense for BusySense {
        fn can_sense(&self) -> bool {
            true
        }
        fn sense(&mut self, _timeout_ms: u32) -> SenseResult {
            if self.0 > 0 {
                self.0 -= 1;
                SenseResult::Busy
            } else {
                SenseResult::Idle
            }
        }
    }

    fn config() -> BeaconConfig {
        BeaconConfig {
            min_interval_ms: 1000,
            max_silence_ms: 5000,
            jitter_max_ms: 0,
            info_interval_ms: 0,
            operational_every_n_cores: 0,
            ..Default::default()
        }
    }

    fn fix(lat_e7: i32) -> PositionSnapshot {
        PositionSnapshot {
            fix_state: FixState::Fix3D,
            pos_valid: true,
            lat_e7,
            lon_e7: 0,
            last_fix_ms: Some(0),
            sats: Some(9),
        }
    }

    fn kinds(radio: &LoopRadio) -> Vec<PacketKind> {
        radio
            .sent
            .iter()
            .map(|f| wire::decode_frame(f).unwrap().kind())
            .collect()
    }

    #[test]
    fn first_fix_sends_core_then_tail1() {
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut radio = LoopRadio::default();
        rt.set_self_position(&fix(0), 1000);
        let r = rt.tick(1000, &mut radio, None);
        assert_eq!(r.sent.map(|f| f.kind), Some(PacketKind::Core));
        rt.tick(1100, &mut radio, None);
        assert_eq!(kinds(&radio), vec![PacketKind::Core, PacketKind::Tail1]);
        match wire::decode_frame(&radio.sent[1]).unwrap() {
            Packet::Tail1(t) => {
                assert_eq!(t.ref_core_seq, 1);
                assert_eq!(t.sats, Some(9));
                assert_eq!(t.pos_flags, Some(0x03));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rt.stats().tx_ok, 2);
    }

    #[test]
    fn no_commit_no_interval_beacon() {
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut radio = LoopRadio::default();
        rt.set_self_position(&fix(0), 1000);
        rt.tick(1000, &mut radio, None);
        rt.tick(1001, &mut radio, None);
        // Same spot, no new commit: nothing until max silence.
        rt.set_self_position(&fix(0), 2500);
        rt.tick(2500, &mut radio, None);
        assert_eq!(radio.sent.len(), 2);
        rt.tick(6000, &mut radio, None);
        assert_eq!(radio.sent.len(), 3);
        assert_eq!(kinds(&radio)[2], PacketKind::Core);
    }

    #[test]
    fn lost_fix_invalidates_self_entry() {
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut radio = LoopRadio::default();
        rt.set_self_position(&fix(50), 1000);
        rt.tick(1000, &mut radio, None);
        assert!(rt.table().self_entry().unwrap().position.is_some());

        let lost = PositionSnapshot {
            fix_state: FixState::NoFix,
            pos_valid: false,
            ..fix(50)
        };
        rt.set_self_position(&lost, 2000);
        assert!(rt.table().self_entry().unwrap().position.is_none());

        // The same spot regained is a first fix again.
        rt.set_self_position(&fix(50), 3000);
        let s = rt.table().self_entry().unwrap();
        assert_eq!(s.position.map(|p| p.lat_e7), Some(50));
        assert_eq!(s.last_seen_ms, 3000);
    }

    #[test]
    fn alive_at_silence_without_fix() {
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut radio = LoopRadio::default();
        rt.tick(1000, &mut radio, None);
        assert!(radio.sent.is_empty());
        rt.tick(5000, &mut radio, None);
        assert_eq!(kinds(&radio), vec![PacketKind::Alive]);
    }

    #[test]
    fn failed_send_is_retried_with_backoff() {
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut radio = LoopRadio {
            fail_sends: 1,
            ..Default::default()
        };
        rt.set_self_position(&fix(0), 1000);
        assert!(rt.tick(1000, &mut radio, None).sent.is_none());
        assert_eq!(rt.stats().tx_err, 1);
        assert!(rt.tick(1100, &mut radio, None).sent.is_none());
        let r = rt.tick(1200, &mut radio, None);
        assert_eq!(r.sent.map(|f| (f.kind, f.seq)), Some((PacketKind::Core, 1)));
    }

    #[test]
    fn busy_channel_defers() {
        let cfg = BeaconConfig {
            sense_enabled: true,
            ..config()
        };
        let mut rt = NodeRuntime::new(NodeId::new(1), &cfg, 0);
        let mut radio = LoopRadio::default();
        let mut sense = BusySense(1);
        rt.set_self_position(&fix(0), 1000);
        assert!(rt.tick(1000, &mut radio, Some(&mut sense)).sent.is_none());
        assert_eq!(rt.stats().sense_deferrals, 1);
        assert!(radio.sent.is_empty());
        assert!(rt.tick(1200, &mut radio, Some(&mut sense)).sent.is_some());
    }

    #[test]
    fn operational_and_info_followups() {
        let cfg = BeaconConfig {
            operational_every_n_cores: 1,
            info_interval_ms: 60_000,
            hw_profile_id: Some(0x0102),
            ..config()
        };
        let mut rt = NodeRuntime::new(NodeId::new(1), &cfg, 0);
        rt.set_battery_pct(Some(77));
        let mut radio = LoopRadio::default();
        rt.set_self_position(&fix(0), 1000);
        for t in [1000, 1100, 1200, 1300] {
            rt.tick(t, &mut radio, None);
        }
        assert_eq!(
            kinds(&radio),
            vec![
                PacketKind::Core,
                PacketKind::Tail1,
                PacketKind::Tail2,
                PacketKind::Info
            ]
        );
        match wire::decode_frame(&radio.sent[2]).unwrap() {
            Packet::Tail2(t) => {
                assert_eq!(t.battery_pct, Some(77));
                assert_eq!(t.uptime_s, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        match wire::decode_frame(&radio.sent[3]).unwrap() {
            Packet::Info(i) => {
                assert_eq!(i.max_silence_10s, Some(0));
                assert_eq!(i.hw_profile_id, Some(0x0102));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rx_is_applied_and_counted() {
        let mut a = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut b = NodeRuntime::new(NodeId::new(2), &config(), 0);
        let mut radio_a = LoopRadio::default();
        let mut radio_b = LoopRadio::default();
        a.set_self_position(&fix(100), 1000);
        a.tick(1000, &mut radio_a, None);
        radio_b.inbox.extend(radio_a.sent.iter().cloned());
        radio_b.inbox.extend(radio_a.sent.iter().cloned());
        radio_b.inbox.push_back(vec![0xFF, 0xFF]);
        let r = b.tick(1000, &mut radio_b, None);
        assert_eq!(r.received.len(), 3);
        assert_eq!(b.stats().rx_ok, 1);
        assert_eq!(b.stats().rx_duplicate, 1);
        assert_eq!(b.stats().rx_dropped, 1);
        let peer = b.table().find(NodeId::new(1)).unwrap();
        assert_eq!(peer.last_rssi, -72);
        assert!(peer.position.is_some());
    }

    #[test]
    fn rx_bounded_per_tick() {
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut radio = LoopRadio::default();
        for _ in 0..10 {
            radio.inbox.push_back(vec![0x00]);
        }
        let r = rt.tick(0, &mut radio, None);
        assert_eq!(r.received.len(), 4);
        assert_eq!(radio.inbox.len(), 6);
    }

    #[test]
    fn publish_rate_limited() {
        #[derive(Default)]
        struct Sink(u32);
        impl CompanionTransport for Sink {
            fn set_device_info(&mut self, _blob: &[u8]) {}
            fn set_node_table_response(&mut self, _blob: &[u8]) {
                self.0 += 1;
            }
            fn node_table_request(&self) -> (u16, u16) {
                (0, 0)
            }
        }
        let mut rt = NodeRuntime::new(NodeId::new(1), &config(), 0);
        let mut sink = Sink::default();
        assert!(rt.publish(0, &mut sink));
        assert!(!rt.publish(999, &mut sink));
        assert!(rt.publish(1000, &mut sink));
        assert_eq!(sink.0, 2);
    }

    #[test]
    fn followup_slots_priority_and_replace() {
        let mut s = FollowUpSlots::default();
        s.push(FollowUp::Informative);
        s.push(FollowUp::Tail1(QualitySample {
            pos_flags: None,
            sats: Some(1),
        }));
        s.push(FollowUp::Tail1(QualitySample {
            pos_flags: None,
            sats: Some(2),
        }));
        assert_eq!(
            s.pop(),
            Some(FollowUp::Tail1(QualitySample {
                pos_flags: None,
                sats: Some(2)
            }))
        );
        assert_eq!(s.pop(), Some(FollowUp::Informative));
        assert!(s.pop().is_none());
        assert!(s.is_empty());
    }
}
