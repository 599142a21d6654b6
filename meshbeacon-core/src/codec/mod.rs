//! Per-kind payload codecs. Each submodule encodes a complete frame (header + payload)
//! and decodes a bare payload the caller has already split off the header.

pub mod alive;
pub mod core;
pub mod info;
pub mod tail1;
pub mod tail2;

use crate::identity::NodeId;
use crate::protocol::{
    PacketKind, COMMON_PREFIX_SIZE, HEADER_SIZE, NODE_ID_OFFSET, PAYLOAD_VERSION, SEQ_OFFSET,
};
use crate::wire;

pub use self::alive::AliveFields;
pub use self::core::CoreFields;
pub use self::info::InfoFields;
pub use self::tail1::Tail1Fields;
pub use self::tail2::Tail2Fields;

/// Fields carried by the common prefix of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub node_id: NodeId,
    pub seq: u16,
}

impl Prefix {
    pub fn new(node_id: NodeId, seq: u16) -> Self {
        Self { node_id, seq }
    }
}

/// Error encoding a frame. Nothing must be transmitted when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("header: {0}")]
    Header(#[from] wire::HeaderError),
}

/// Error decoding a payload. Always a silent drop at the receive path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload of {len} bytes is shorter than minimum {min}")]
    ShortBuffer { len: usize, min: usize },
    #[error("payload length {0} is not a valid length for this kind")]
    BadLength(usize),
    #[error("unsupported payload version {0:#04x}")]
    BadVersion(u8),
    #[error("field value out of range")]
    OutOfRange,
}

/// Check length and version in the fixed order: short buffer, then length set, then version.
pub(crate) fn check_payload(payload: &[u8], valid_lens: &[usize]) -> Result<Prefix, DecodeError> {
    let min = valid_lens.first().copied().unwrap_or(COMMON_PREFIX_SIZE);
    if payload.len() < min {
        return Err(DecodeError::ShortBuffer {
            len: payload.len(),
            min,
        });
    }
    if !valid_lens.contains(&payload.len()) {
        return Err(DecodeError::BadLength(payload.len()));
    }
    if payload[0] != PAYLOAD_VERSION {
        return Err(DecodeError::BadVersion(payload[0]));
    }
    Ok(read_prefix(payload))
}

fn read_prefix(payload: &[u8]) -> Prefix {
    let mut id = [0u8; 6];
    id.copy_from_slice(&payload[NODE_ID_OFFSET..NODE_ID_OFFSET + 6]);
    Prefix {
        node_id: NodeId::from_le_bytes(id),
        seq: read_u16(payload, SEQ_OFFSET),
    }
}

pub(crate) fn write_prefix(payload: &mut [u8], prefix: &Prefix) {
    payload[0] = PAYLOAD_VERSION;
    payload[NODE_ID_OFFSET..NODE_ID_OFFSET + 6].copy_from_slice(&prefix.node_id.to_le_bytes());
    payload[SEQ_OFFSET..SEQ_OFFSET + 2].copy_from_slice(&prefix.seq.to_le_bytes());
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Smallest valid length whose field set reaches `needed`.
pub(crate) fn fit_len(valid_lens: &[usize], needed: usize) -> usize {
    valid_lens
        .iter()
        .copied()
        .find(|&l| l >= needed)
        .unwrap_or(needed)
}

/// Write header + payload into `out`. Returns total frame size.
pub(crate) fn finish_frame(
    kind: PacketKind,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, EncodeError> {
    let needed = HEADER_SIZE + payload.len();
    if out.len() < needed {
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }
    wire::encode_header(kind, payload.len(), &mut out[..HEADER_SIZE])?;
    out[HEADER_SIZE..needed].copy_from_slice(payload);
    Ok(needed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LENS: [usize; 3] = [9, 10, 14];

    fn payload(len: usize) -> Vec<u8> {
        let mut p = vec![0u8; len];
        write_prefix(&mut p, &Prefix::new(NodeId::new(0x0102_0304_0506), 0xBEEF));
        p
    }

    #[test]
    fn prefix_layout() {
        let p = payload(9);
        assert_eq!(p, [0x00, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0xEF, 0xBE]);
        let prefix = check_payload(&p, &LENS).unwrap();
        assert_eq!(prefix.node_id.as_u64(), 0x0102_0304_0506);
        assert_eq!(prefix.seq, 0xBEEF);
    }

    #[test]
    fn short_buffer_checked_before_version() {
        let mut p = payload(8);
        p[0] = 0x42;
        assert_eq!(
            check_payload(&p, &LENS),
            Err(DecodeError::ShortBuffer { len: 8, min: 9 })
        );
    }

    #[test]
    fn bad_length_checked_before_version() {
        let mut p = payload(11);
        p[0] = 0x42;
        assert_eq!(check_payload(&p, &LENS), Err(DecodeError::BadLength(11)));
    }

    #[test]
    fn bad_version() {
        let mut p = payload(10);
        p[0] = 0x01;
        assert_eq!(check_payload(&p, &LENS), Err(DecodeError::BadVersion(0x01)));
    }

    #[test]
    fn fit_len_picks_smallest_cover() {
        assert_eq!(fit_len(&LENS, 9), 9);
        assert_eq!(fit_len(&LENS, 10), 10);
        assert_eq!(fit_len(&LENS, 11), 14);
    }

    #[test]
    fn finish_frame_buffer_too_small_writes_nothing() {
        let p = payload(9);
        let mut out = [0xAAu8; 10];
        let err = finish_frame(PacketKind::Alive, &p, &mut out).unwrap_err();
        assert_eq!(
            err,
            EncodeError::BufferTooSmall {
                needed: 11,
                available: 10
            }
        );
        assert!(out.iter().all(|&b| b == 0xAA));
    }
}
