//! Capability traits the host implements: radio, optional channel sense, companion transport.
//! Production drivers and test doubles satisfy the same contract.

/// Broadcast radio. Calls are synchronous and complete before the tick proceeds.
pub trait Radio {
    /// Transmit one frame. `false` on failure.
    fn send(&mut self, frame: &[u8]) -> bool;

    /// Copy the next received frame into `buf` and return its length, if any.
    fn recv(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// RSSI of the frame last returned by `recv`, in dBm.
    fn last_rssi(&self) -> i8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseResult {
    Idle,
    Busy,
    Unsupported,
    Error,
}

/// Optional listen-before-talk capability.
pub trait ChannelSense {
    fn can_sense(&self) -> bool;
    fn sense(&mut self, timeout_ms: u32) -> SenseResult;
}

/// Companion-app link. Holds the last published blobs and the reader's page request.
pub trait CompanionTransport {
    fn set_device_info(&mut self, blob: &[u8]);
    fn set_node_table_response(&mut self, blob: &[u8]);
    /// Last (snapshot id, page index) requested by the reader.
    fn node_table_request(&self) -> (u16, u16);
}

/// Fix quality reported by the positioning source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixState {
    #[default]
    NoFix,
    Fix2D,
    Fix3D,
}

/// Per-tick position sample pushed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionSnapshot {
    pub fix_state: FixState,
    pub pos_valid: bool,
    pub lat_e7: i32,
    pub lon_e7: i32,
    /// Host time of the last fix, if any.
    pub last_fix_ms: Option<u64>,
    pub sats: Option<u8>,
}

impl PositionSnapshot {
    pub fn has_fix(&self) -> bool {
        self.pos_valid && self.fix_state != FixState::NoFix
    }

    /// Age of the fix in whole seconds at `now_ms`, capped at `u16::MAX`.
    pub fn age_s(&self, now_ms: u64) -> u16 {
        self.last_fix_ms
            .map(|t| (now_ms.saturating_sub(t) / 1000).min(u16::MAX as u64) as u16)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_requires_valid_and_state() {
        let mut p = PositionSnapshot {
            fix_state: FixState::Fix3D,
            pos_valid: true,
            ..Default::default()
        };
        assert!(p.has_fix());
        p.pos_valid = false;
        assert!(!p.has_fix());
        p.pos_valid = true;
        p.fix_state = FixState::NoFix;
        assert!(!p.has_fix());
    }

    #[test]
    fn age_in_seconds() {
        let p = PositionSnapshot {
            last_fix_ms: Some(1_000),
            ..Default::default()
        };
        assert_eq!(p.age_s(4_999), 3);
        assert_eq!(p.age_s(500), 0);
        assert_eq!(PositionSnapshot::default().age_s(10_000), 0);
    }
}
