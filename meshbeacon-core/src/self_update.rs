//! Position-commit policy: decides when a new self position is worth announcing.
//! Each commit grants the cadence engine one interval-path permission.

use crate::hal::PositionSnapshot;

pub const DEFAULT_MIN_DISTANCE_M: f64 = 25.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    None,
    FirstFix,
    MaxSilence,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateDecision {
    pub reason: UpdateReason,
    pub distance_m: f64,
    pub dt_ms: u64,
}

impl UpdateDecision {
    pub fn should_commit(&self) -> bool {
        self.reason != UpdateReason::None
    }

    fn none(distance_m: f64, dt_ms: u64) -> Self {
        Self {
            reason: UpdateReason::None,
            distance_m,
            dt_ms,
        }
    }
}

/// Equirectangular distance in metres between two 1e-7 degree points.
pub fn distance_m_e7(lat1_e7: i32, lon1_e7: i32, lat2_e7: i32, lon2_e7: i32) -> f64 {
    let to_rad = |e7: i32| (e7 as f64 / 1e7).to_radians();
    let (lat1, lon1, lat2, lon2) = (to_rad(lat1_e7), to_rad(lon1_e7), to_rad(lat2_e7), to_rad(lon2_e7));
    let x = (lon2 - lon1) * ((lat1 + lat2) / 2.0).cos();
    let y = lat2 - lat1;
    (x * x + y * y).sqrt() * EARTH_RADIUS_M
}

pub struct SelfUpdatePolicy {
    min_time_ms: u64,
    max_silence_ms: u64,
    min_distance_m: f64,
    last_commit: Option<(u64, i32, i32)>,
}

impl SelfUpdatePolicy {
    pub fn new(min_time_ms: u64, max_silence_ms: u64) -> Self {
        Self {
            min_time_ms,
            max_silence_ms,
            min_distance_m: DEFAULT_MIN_DISTANCE_M,
            last_commit: None,
        }
    }

    pub fn set_min_distance_m(&mut self, metres: f64) {
        self.min_distance_m = metres;
    }

    pub fn evaluate(&self, now_ms: u64, snapshot: &PositionSnapshot) -> UpdateDecision {
        if !snapshot.has_fix() {
            return UpdateDecision::none(0.0, 0);
        }
        let Some((at_ms, lat, lon)) = self.last_commit else {
            return UpdateDecision {
                reason: UpdateReason::FirstFix,
                distance_m: 0.0,
                dt_ms: 0,
            };
        };
        let dt_ms = now_ms.saturating_sub(at_ms);
        let distance_m = distance_m_e7(lat, lon, snapshot.lat_e7, snapshot.lon_e7);
        let reason = if self.max_silence_ms > 0 && dt_ms >= self.max_silence_ms {
            UpdateReason::MaxSilence
        } else if dt_ms >= self.min_time_ms && distance_m >= self.min_distance_m {
            UpdateReason::Distance
        } else {
            return UpdateDecision::none(distance_m, dt_ms);
        };
        UpdateDecision {
            reason,
            distance_m,
            dt_ms,
        }
    }

    pub fn commit(&mut self, now_ms: u64, snapshot: &PositionSnapshot) {
        self.last_commit = Some((now_ms, snapshot.lat_e7, snapshot.lon_e7));
    }

    /// Forget the last commit so the next fix counts as a first fix.
    pub fn reset(&mut self) {
        self.last_commit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::FixState;

    fn at(lat_e7: i32, lon_e7: i32) -> PositionSnapshot {
        PositionSnapshot {
            fix_state: FixState::Fix3D,
            pos_valid: true,
            lat_e7,
            lon_e7,
            last_fix_ms: Some(0),
            sats: Some(8),
        }
    }

    #[test]
    fn distance_scale() {
        // 0.001 degree of latitude is about 111 m.
        let d = distance_m_e7(0, 0, 10_000, 0);
        assert!((d - 111.19).abs() < 0.1, "{}", d);
        assert_eq!(distance_m_e7(5, 5, 5, 5), 0.0);
    }

    #[test]
    fn reasons() {
        let mut p = SelfUpdatePolicy::new(18_000, 72_000);
        assert_eq!(
            p.evaluate(0, &PositionSnapshot::default()).reason,
            UpdateReason::None
        );
        assert_eq!(p.evaluate(0, &at(0, 0)).reason, UpdateReason::FirstFix);
        p.commit(0, &at(0, 0));

        // Moved ~111 m but too soon.
        assert_eq!(p.evaluate(10_000, &at(10_000, 0)).reason, UpdateReason::None);
        assert_eq!(p.evaluate(18_000, &at(10_000, 0)).reason, UpdateReason::Distance);
        // Not moved enough.
        assert_eq!(p.evaluate(20_000, &at(1_000, 0)).reason, UpdateReason::None);
        // Silence wins regardless of distance.
        let d = p.evaluate(72_000, &at(0, 0));
        assert_eq!(d.reason, UpdateReason::MaxSilence);
        assert_eq!(d.dt_ms, 72_000);
        assert!(d.should_commit());
    }

    #[test]
    fn zero_max_silence_disables_override() {
        let mut p = SelfUpdatePolicy::new(1_000, 0);
        p.commit(0, &at(0, 0));
        assert_eq!(p.evaluate(1_000_000, &at(0, 0)).reason, UpdateReason::None);
    }

    #[test]
    fn reset_makes_next_fix_first() {
        let mut p = SelfUpdatePolicy::new(18_000, 72_000);
        p.commit(0, &at(0, 0));
        assert_eq!(p.evaluate(1_000, &at(0, 0)).reason, UpdateReason::None);
        p.reset();
        assert_eq!(p.evaluate(1_000, &at(0, 0)).reason, UpdateReason::FirstFix);
    }
}
