//! Info (informative) codec: max silence, hardware profile id, firmware version id.

use super::{
    check_payload, finish_frame, fit_len, read_u16, write_prefix, DecodeError, EncodeError, Prefix,
};
use crate::protocol::{PacketKind, COMMON_PREFIX_SIZE};

const MAX_SILENCE_OFFSET: usize = COMMON_PREFIX_SIZE;
const HW_PROFILE_OFFSET: usize = 10;
const FW_VERSION_OFFSET: usize = 12;

pub const ID_ABSENT: u16 = 0xFFFF;

pub const VALID_LENS: [usize; 4] = [9, 10, 12, 14];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoFields {
    pub prefix: Prefix,
    /// Max silence in 10 s units. 0 means unknown.
    pub max_silence_10s: Option<u8>,
    pub hw_profile_id: Option<u16>,
    pub fw_version_id: Option<u16>,
}

/// Encode an Info frame. Absent fields ahead of a present one are padded with zero or the
/// absent id marker.
pub fn encode(fields: &InfoFields, out: &mut [u8]) -> Result<usize, EncodeError> {
    let mut payload = [0u8; 14];
    write_prefix(&mut payload, &fields.prefix);
    let needed = if fields.fw_version_id.is_some() {
        FW_VERSION_OFFSET + 2
    } else if fields.hw_profile_id.is_some() {
        HW_PROFILE_OFFSET + 2
    } else if fields.max_silence_10s.is_some() {
        MAX_SILENCE_OFFSET + 1
    } else {
        COMMON_PREFIX_SIZE
    };
    let len = fit_len(&VALID_LENS, needed);
    if len > MAX_SILENCE_OFFSET {
        payload[MAX_SILENCE_OFFSET] = fields.max_silence_10s.unwrap_or(0);
    }
    if len > HW_PROFILE_OFFSET {
        let hw = fields.hw_profile_id.unwrap_or(ID_ABSENT);
        payload[HW_PROFILE_OFFSET..HW_PROFILE_OFFSET + 2].copy_from_slice(&hw.to_le_bytes());
    }
    if let Some(fw) = fields.fw_version_id {
        payload[FW_VERSION_OFFSET..FW_VERSION_OFFSET + 2].copy_from_slice(&fw.to_le_bytes());
    }
    finish_frame(PacketKind::Info, &payload[..len], out)
}

/// Decode a 9, 10, 12 or 14-byte Info payload.
pub fn decode(payload: &[u8]) -> Result<InfoFields, DecodeError> {
    let prefix = check_payload(payload, &VALID_LENS)?;
    let len = payload.len();
    Ok(InfoFields {
        prefix,
        max_silence_10s: payload.get(MAX_SILENCE_OFFSET).copied(),
        hw_profile_id: (len >= HW_PROFILE_OFFSET + 2).then(|| read_u16(payload, HW_PROFILE_OFFSET)),
        fw_version_id: (len >= FW_VERSION_OFFSET + 2).then(|| read_u16(payload, FW_VERSION_OFFSET)),
    })
}
