//! Tail-1 (position quality) codec. Carries a back-reference to the seq16 of the Core it qualifies.

use super::{
    check_payload, finish_frame, fit_len, read_u16, write_prefix, DecodeError, EncodeError, Prefix,
};
use crate::protocol::{PacketKind, COMMON_PREFIX_SIZE};

const REF_SEQ_OFFSET: usize = COMMON_PREFIX_SIZE;
const POS_FLAGS_OFFSET: usize = 11;
const SATS_OFFSET: usize = 12;

/// Base (prefix + ref seq), + pos flags, + sats.
pub const VALID_LENS: [usize; 3] = [11, 12, 13];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail1Fields {
    pub prefix: Prefix,
    /// Seq16 of the Core sample this frame qualifies.
    pub ref_core_seq: u16,
    pub pos_flags: Option<u8>,
    pub sats: Option<u8>,
}

/// Encode a Tail-1 frame. Optional fields are emitted in order, so `sats` without
/// `pos_flags` writes a zero flags byte.
pub fn encode(fields: &Tail1Fields, out: &mut [u8]) -> Result<usize, EncodeError> {
    let mut payload = [0u8; 13];
    write_prefix(&mut payload, &fields.prefix);
    payload[REF_SEQ_OFFSET..REF_SEQ_OFFSET + 2].copy_from_slice(&fields.ref_core_seq.to_le_bytes());
    let needed = if fields.sats.is_some() {
        SATS_OFFSET + 1
    } else if fields.pos_flags.is_some() {
        POS_FLAGS_OFFSET + 1
    } else {
        VALID_LENS[0]
    };
    let len = fit_len(&VALID_LENS, needed);
    if len > POS_FLAGS_OFFSET {
        payload[POS_FLAGS_OFFSET] = fields.pos_flags.unwrap_or(0);
    }
    if len > SATS_OFFSET {
        payload[SATS_OFFSET] = fields.sats.unwrap_or(0);
    }
    finish_frame(PacketKind::Tail1, &payload[..len], out)
}

/// Decode an 11, 12 or 13-byte Tail-1 payload.
pub fn decode(payload: &[u8]) -> Result<Tail1Fields, DecodeError> {
    let prefix = check_payload(payload, &VALID_LENS)?;
    Ok(Tail1Fields {
        prefix,
        ref_core_seq: read_u16(payload, REF_SEQ_OFFSET),
        pos_flags: payload.get(POS_FLAGS_OFFSET).copied(),
        sats: payload.get(SATS_OFFSET).copied(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeId;
    use crate::protocol::HEADER_SIZE;

    fn fields(pos_flags: Option<u8>, sats: Option<u8>) -> Tail1Fields {
        Tail1Fields {
            prefix: Prefix::new(NodeId::new(0x11_2233_4455), 8),
            ref_core_seq: 7,
            pos_flags,
            sats,
        }
    }

    fn roundtrip(f: &Tail1Fields) -> (usize, Tail1Fields) {
        let mut out = [0u8; 32];
        let n = encode(f, &mut out).unwrap();
        (n, decode(&out[HEADER_SIZE..n]).unwrap())
    }

    #[test]
    fn base_only() {
        let f = fields(None, None);
        let (n, back) = roundtrip(&f);
        assert_eq!(n, 13);
        assert_eq!(back, f);
    }

    #[test]
    fn full() {
        let f = fields(Some(0x05), Some(11));
        let (n, back) = roundtrip(&f);
        assert_eq!(n, 15);
        assert_eq!(back, f);
    }

    #[test]
    fn gap_is_filled_with_sentinel() {
        let (n, back) = roundtrip(&fields(None, Some(9)));
        assert_eq!(n, 15);
        assert_eq!(back.pos_flags, Some(0));
        assert_eq!(back.sats, Some(9));
    }

    #[test]
    fn ref_seq_is_le_at_offset_nine() {
        let mut out = [0u8; 32];
        let mut f = fields(None, None);
        f.ref_core_seq = 0x1234;
        encode(&f, &mut out).unwrap();
        assert_eq!(&out[HEADER_SIZE + 9..HEADER_SIZE + 11], &[0x34, 0x12]);
    }

    #[test]
    fn below_minimum_is_short() {
        assert!(matches!(
            decode(&[0u8; 10]),
            Err(DecodeError::ShortBuffer { len: 10, min: 11 })
        ));
        assert_eq!(decode(&[0u8; 14]), Err(DecodeError::BadLength(14)));
    }
}
