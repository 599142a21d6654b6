//! Tail-2 (operational) codec: battery percent and uptime.

use super::{
    check_payload, finish_frame, fit_len, read_u32, write_prefix, DecodeError, EncodeError, Prefix,
};
use crate::protocol::{PacketKind, COMMON_PREFIX_SIZE};

const BATTERY_OFFSET: usize = COMMON_PREFIX_SIZE;
const UPTIME_OFFSET: usize = 10;

pub const BATTERY_ABSENT: u8 = 0xFF;

pub const VALID_LENS: [usize; 3] = [9, 10, 14];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail2Fields {
    pub prefix: Prefix,
    pub battery_pct: Option<u8>,
    pub uptime_s: Option<u32>,
}

/// Encode a Tail-2 frame using the shortest valid length that holds every present field.
/// A missing battery ahead of a present uptime is written as the absent marker.
pub fn encode(fields: &Tail2Fields, out: &mut [u8]) -> Result<usize, EncodeError> {
    let mut payload = [0u8; 14];
    write_prefix(&mut payload, &fields.prefix);
    let needed = if fields.uptime_s.is_some() {
        UPTIME_OFFSET + 4
    } else if fields.battery_pct.is_some() {
        BATTERY_OFFSET + 1
    } else {
        COMMON_PREFIX_SIZE
    };
    let len = fit_len(&VALID_LENS, needed);
    if len > BATTERY_OFFSET {
        payload[BATTERY_OFFSET] = fields.battery_pct.unwrap_or(BATTERY_ABSENT);
    }
    if let Some(uptime) = fields.uptime_s {
        payload[UPTIME_OFFSET..UPTIME_OFFSET + 4].copy_from_slice(&uptime.to_le_bytes());
    }
    finish_frame(PacketKind::Tail2, &payload[..len], out)
}

/// Decode a 9, 10 or 14-byte Tail-2 payload.
pub fn decode(payload: &[u8]) -> Result<Tail2Fields, DecodeError> {
    let prefix = check_payload(payload, &VALID_LENS)?;
    let uptime_s = if payload.len() >= UPTIME_OFFSET + 4 {
        Some(read_u32(payload, UPTIME_OFFSET))
    } else {
        None
    };
    Ok(Tail2Fields {
        prefix,
        battery_pct: payload.get(BATTERY_OFFSET).copied(),
        uptime_s,
    })
}
