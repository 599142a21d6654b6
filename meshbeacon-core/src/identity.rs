//! Node identity: 48-bit node id and the CRC-derived short id surfaced to constrained consumers.

use std::fmt;

use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final xor.
const SHORT_ID_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

const NODE_ID_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Node id: lower 48 bits of a 64-bit value. The upper 16 bits are always zero.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Build a node id, discarding anything above bit 47.
    pub const fn new(raw: u64) -> Self {
        NodeId(raw & NODE_ID_MASK)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// 6-byte little-endian wire representation.
    pub fn to_le_bytes(&self) -> [u8; 6] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2], b[3], b[4], b[5]]
    }

    pub fn from_le_bytes(bytes: [u8; 6]) -> Self {
        let mut wide = [0u8; 8];
        wide[..6].copy_from_slice(&bytes);
        NodeId(u64::from_le_bytes(wide))
    }

    /// Derive the short id. 0x0000 and 0xFFFF are reserved, so those CRC results get bit 0 flipped once.
    pub fn short_id(&self) -> ShortId {
        let crc = SHORT_ID_CRC.checksum(&self.to_le_bytes());
        if crc == 0x0000 || crc == 0xFFFF {
            ShortId(crc ^ 0x0001)
        } else {
            ShortId(crc)
        }
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        NodeId::new(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012X}", self.0)
    }
}

/// 16-bit display identifier. Not unique: distinct node ids may collide.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ShortId(u16);

impl ShortId {
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn upper_bits_are_masked() {
        let id = NodeId::new(0xABCD_1122_3344_5566);
        assert_eq!(id.as_u64(), 0x1122_3344_5566);
    }

    #[test]
    fn le_bytes_roundtrip() {
        let id = NodeId::new(0x0000_A1B2_C3D4_E5F6);
        let bytes = id.to_le_bytes();
        assert_eq!(bytes, [0xF6, 0xE5, 0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(NodeId::from_le_bytes(bytes), id);
    }

    #[test]
    fn crc_matches_ccitt_false_check_value() {
        // Standard check input "123456789" -> 0x29B1.
        assert_eq!(SHORT_ID_CRC.checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn short_id_is_deterministic() {
        let id = NodeId::new(0x1234_5678_9ABC);
        assert_eq!(id.short_id(), id.short_id());
        assert_eq!(id.short_id(), NodeId::new(0x1234_5678_9ABC).short_id());
    }

    #[test]
    fn short_id_never_reserved() {
        for raw in 0..50_000u64 {
            let sid = NodeId::new(raw).short_id().as_u16();
            assert_ne!(sid, 0x0000);
            assert_ne!(sid, 0xFFFF);
        }
    }

    #[test]
    fn colliding_pair_exists_in_small_range() {
        let mut seen: HashMap<ShortId, NodeId> = HashMap::new();
        let mut found = false;
        for raw in 1..200_000u64 {
            let id = NodeId::new(raw);
            if let Some(prev) = seen.insert(id.short_id(), id) {
                assert_ne!(prev, id);
                found = true;
                break;
            }
        }
        assert!(found, "pigeonhole guarantees a collision");
    }
}
