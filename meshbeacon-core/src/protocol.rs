//! Beacon wire protocol: packet kinds, payload version and frame sizes.

/// Payload-format version carried in byte 0 of every payload. Frames with any other value are dropped.
pub const PAYLOAD_VERSION: u8 = 0x00;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 2;

/// Largest payload the 6-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = 63;

/// Largest on-air frame (header + max payload).
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_LEN;

/// Common prefix shared by all payloads: version (1) + node id (6) + seq16 (2).
pub const COMMON_PREFIX_SIZE: usize = 9;

/// Byte offset of the 48-bit node id inside a payload.
pub const NODE_ID_OFFSET: usize = 1;

/// Byte offset of the seq16 inside a payload.
pub const SEQ_OFFSET: usize = 7;

/// All packet kinds carried in the 7-bit header field. 0 is reserved and never valid on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketKind {
    /// Position-bearing primary beacon. Fixed 15-byte payload.
    Core = 0x01,
    /// Liveness without position, sent at the silence threshold when there is no fix.
    Alive = 0x02,
    /// Position quality, linked to a prior Core by back-reference.
    Tail1 = 0x03,
    /// Operational state: battery, uptime.
    Tail2 = 0x04,
    /// Informative state: max silence, hardware and firmware ids.
    Info = 0x05,
}

impl PacketKind {
    /// Highest kind value this codec understands.
    pub const MAX: u8 = PacketKind::Info as u8;

    /// `None` for 0 (reserved) and for kinds above `MAX`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketKind::Core),
            0x02 => Some(PacketKind::Alive),
            0x03 => Some(PacketKind::Tail1),
            0x04 => Some(PacketKind::Tail2),
            0x05 => Some(PacketKind::Info),
            _ => None,
        }
    }

    /// Wire value of the 7-bit kind field.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Auxiliary kinds are deduplicated per node and never touch position.
    pub fn is_auxiliary(self) -> bool {
        matches!(self, PacketKind::Tail1 | PacketKind::Tail2 | PacketKind::Info)
    }

    /// Short uppercase label used in log lines.
    pub fn label(self) -> &'static str {
        match self {
            PacketKind::Core => "CORE",
            PacketKind::Alive => "ALIVE",
            PacketKind::Tail1 => "TAIL1",
            PacketKind::Tail2 => "TAIL2",
            PacketKind::Info => "INFO",
        }
    }
}
