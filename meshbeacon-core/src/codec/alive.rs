//! Alive codec: common prefix + optional status byte. Sent when there is no position fix.

use super::{check_payload, finish_frame, write_prefix, DecodeError, EncodeError, Prefix};
use crate::protocol::{PacketKind, COMMON_PREFIX_SIZE};

pub const VALID_LENS: [usize; 2] = [COMMON_PREFIX_SIZE, COMMON_PREFIX_SIZE + 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliveFields {
    pub prefix: Prefix,
    pub status: Option<u8>,
}

/// Encode an Alive frame: 9-byte payload, or 10 with the status byte.
pub fn encode(fields: &AliveFields, out: &mut [u8]) -> Result<usize, EncodeError> {
    let mut payload = [0u8; COMMON_PREFIX_SIZE + 1];
    write_prefix(&mut payload, &fields.prefix);
    let len = match fields.status {
        Some(status) => {
            payload[COMMON_PREFIX_SIZE] = status;
            VALID_LENS[1]
        }
        None => VALID_LENS[0],
    };
    finish_frame(PacketKind::Alive, &payload[..len], out)
}

/// Decode a 9 or 10-byte Alive payload.
pub fn decode(payload: &[u8]) -> Result<AliveFields, DecodeError> {
    let prefix = check_payload(payload, &VALID_LENS)?;
    let status = payload.get(COMMON_PREFIX_SIZE).copied();
    Ok(AliveFields { prefix, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeId;
    use crate::protocol::HEADER_SIZE;

    #[test]
    fn minimal_frame_header() {
        let fields = AliveFields {
            prefix: Prefix::new(NodeId::new(42), 1),
            status: None,
        };
        let mut out = [0u8; 16];
        let n = encode(&fields, &mut out).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&out[..2], &[0x09, 0x04]);
        assert_eq!(decode(&out[HEADER_SIZE..n]).unwrap(), fields);
    }

    #[test]
    fn status_roundtrip() {
        let fields = AliveFields {
            prefix: Prefix::new(NodeId::new(0xFFFF_FFFF_FFFF), 0xFFFF),
            status: Some(0x03),
        };
        let mut out = [0u8; 16];
        let n = encode(&fields, &mut out).unwrap();
        assert_eq!(n, 12);
        assert_eq!(decode(&out[HEADER_SIZE..n]).unwrap(), fields);
    }

    #[test]
    fn eleven_bytes_is_bad_length() {
        let mut p = [0u8; 11];
        p[0] = 0x00;
        assert_eq!(decode(&p), Err(DecodeError::BadLength(11)));
    }
}
