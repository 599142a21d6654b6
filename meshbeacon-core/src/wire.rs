//! Framing: 2-byte LE header (kind:7 | reserved:3 | payload_len:6) + payload.

use crate::codec::{
    self, AliveFields, CoreFields, DecodeError, InfoFields, Tail1Fields, Tail2Fields,
};
use crate::protocol::{PacketKind, HEADER_SIZE, MAX_PAYLOAD_LEN};

const LEN_MASK: u16 = 0x003F;
const RESERVED_SHIFT: u16 = 6;
const RESERVED_MASK: u16 = 0x0007;
const KIND_SHIFT: u16 = 9;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: PacketKind,
    /// Reserved bits as received. Not validated.
    pub reserved: u8,
    pub payload_len: usize,
}

/// Error encoding or decoding the frame header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("short header: {0} bytes")]
    ShortHeader(usize),
    #[error("payload length {0} exceeds 63")]
    PayloadTooLong(usize),
    #[error("kind 0 is reserved")]
    ReservedKind,
    #[error("unknown kind {0}")]
    UnknownKind(u8),
}

/// Write the header for `kind` with reserved bits zero.
pub fn encode_header(kind: PacketKind, payload_len: usize, out: &mut [u8]) -> Result<(), HeaderError> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(HeaderError::PayloadTooLong(payload_len));
    }
    if out.len() < HEADER_SIZE {
        return Err(HeaderError::ShortHeader(out.len()));
    }
    let word = ((kind.as_u8() as u16) << KIND_SHIFT) | (payload_len as u16 & LEN_MASK);
    out[..HEADER_SIZE].copy_from_slice(&word.to_le_bytes());
    Ok(())
}

/// Parse the 2-byte header. Reserved bits are returned as-is and not rejected; the payload
/// length is what the header claims, not checked against the buffer.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, HeaderError> {
    if bytes.len() < HEADER_SIZE {
        return Err(HeaderError::ShortHeader(bytes.len()));
    }
    let word = u16::from_le_bytes([bytes[0], bytes[1]]);
    let raw_kind = (word >> KIND_SHIFT) as u8;
    if raw_kind == 0 {
        return Err(HeaderError::ReservedKind);
    }
    let kind = PacketKind::from_u8(raw_kind).ok_or(HeaderError::UnknownKind(raw_kind))?;
    Ok(FrameHeader {
        kind,
        reserved: ((word >> RESERVED_SHIFT) & RESERVED_MASK) as u8,
        payload_len: (word & LEN_MASK) as usize,
    })
}

/// A decoded frame, one variant per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Core(CoreFields),
    Alive(AliveFields),
    Tail1(Tail1Fields),
    Tail2(Tail2Fields),
    Info(InfoFields),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Core(_) => PacketKind::Core,
            Packet::Alive(_) => PacketKind::Alive,
            Packet::Tail1(_) => PacketKind::Tail1,
            Packet::Tail2(_) => PacketKind::Tail2,
            Packet::Info(_) => PacketKind::Info,
        }
    }

    pub fn prefix(&self) -> &codec::Prefix {
        match self {
            Packet::Core(f) => &f.prefix,
            Packet::Alive(f) => &f.prefix,
            Packet::Tail1(f) => &f.prefix,
            Packet::Tail2(f) => &f.prefix,
            Packet::Info(f) => &f.prefix,
        }
    }
}

/// Error decoding a received frame. Every variant is a silent drop for the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("header: {0}")]
    Header(#[from] HeaderError),
    #[error("declared payload length {declared} but {actual} bytes available")]
    PayloadLenMismatch { declared: usize, actual: usize },
    #[error("{} payload: {source}", .kind.label())]
    Payload {
        kind: PacketKind,
        #[source]
        source: DecodeError,
    },
}

/// Decode one complete frame: header, length check, then the codec for the decoded kind.
pub fn decode_frame(frame: &[u8]) -> Result<Packet, FrameError> {
    let header = decode_header(frame)?;
    let payload = &frame[HEADER_SIZE..];
    if header.payload_len != payload.len() {
        return Err(FrameError::PayloadLenMismatch {
            declared: header.payload_len,
            actual: payload.len(),
        });
    }
    let wrap = |source| FrameError::Payload {
        kind: header.kind,
        source,
    };
    let packet = match header.kind {
        PacketKind::Core => Packet::Core(codec::core::decode(payload).map_err(wrap)?),
        PacketKind::Alive => Packet::Alive(codec::alive::decode(payload).map_err(wrap)?),
        PacketKind::Tail1 => Packet::Tail1(codec::tail1::decode(payload).map_err(wrap)?),
        PacketKind::Tail2 => Packet::Tail2(codec::tail2::decode(payload).map_err(wrap)?),
        PacketKind::Info => Packet::Info(codec::info::decode(payload).map_err(wrap)?),
    };
    Ok(packet)
}
