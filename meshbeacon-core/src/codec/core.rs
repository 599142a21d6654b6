//! Core/position codec: common prefix + lat/lon quantized to 24 bits each. Fixed 15-byte payload.

use super::{check_payload, finish_frame, write_prefix, DecodeError, EncodeError, Prefix};
use crate::protocol::{PacketKind, HEADER_SIZE};

pub const PAYLOAD_LEN: usize = 15;
pub const FRAME_LEN: usize = HEADER_SIZE + PAYLOAD_LEN;

const LAT_OFFSET: usize = 9;
const LON_OFFSET: usize = 12;

/// Largest 24-bit value.
pub const U24_MAX: u32 = 0x00FF_FFFF;

const E7: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreFields {
    pub prefix: Prefix,
    /// Latitude, degrees × 1e7.
    pub lat_e7: i32,
    /// Longitude, degrees × 1e7.
    pub lon_e7: i32,
}

/// Map latitude (degrees × 1e7) onto [0, 2^24 - 1]. Out-of-range input is clamped.
pub fn lat_to_u24(lat_e7: i32) -> u32 {
    quantize(lat_e7, 90.0)
}

/// Longitude counterpart of `lat_to_u24` over ±180°.
pub fn lon_to_u24(lon_e7: i32) -> u32 {
    quantize(lon_e7, 180.0)
}

/// Inverse of `lat_to_u24`: the grid point in 1e-7 degrees. Values above 2^24 - 1 are rejected.
pub fn u24_to_lat(v: u32) -> Result<i32, DecodeError> {
    dequantize(v, 90.0)
}

pub fn u24_to_lon(v: u32) -> Result<i32, DecodeError> {
    dequantize(v, 180.0)
}

fn quantize(value_e7: i32, half_range: f64) -> u32 {
    let deg = (value_e7 as f64 / E7).clamp(-half_range, half_range);
    let scaled = ((deg + half_range) / (2.0 * half_range) * U24_MAX as f64).round();
    (scaled as u32).min(U24_MAX)
}

fn dequantize(v: u32, half_range: f64) -> Result<i32, DecodeError> {
    if v > U24_MAX {
        return Err(DecodeError::OutOfRange);
    }
    let deg = v as f64 / U24_MAX as f64 * (2.0 * half_range) - half_range;
    Ok((deg * E7).round() as i32)
}

fn read_u24(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], 0])
}

fn write_u24(buf: &mut [u8], at: usize, v: u32) {
    let b = v.to_le_bytes();
    buf[at..at + 3].copy_from_slice(&b[..3]);
}

/// Encode a full Core frame (header + 15-byte payload) into `out`.
pub fn encode(fields: &CoreFields, out: &mut [u8]) -> Result<usize, EncodeError> {
    let mut payload = [0u8; PAYLOAD_LEN];
    write_prefix(&mut payload, &fields.prefix);
    write_u24(&mut payload, LAT_OFFSET, lat_to_u24(fields.lat_e7));
    write_u24(&mut payload, LON_OFFSET, lon_to_u24(fields.lon_e7));
    finish_frame(PacketKind::Core, &payload, out)
}

/// Decode a 15-byte Core payload (header already stripped). Any other length is rejected.
pub fn decode(payload: &[u8]) -> Result<CoreFields, DecodeError> {
    let prefix = check_payload(payload, &[PAYLOAD_LEN])?;
    let lat_e7 = u24_to_lat(read_u24(payload, LAT_OFFSET))?;
    let lon_e7 = u24_to_lon(read_u24(payload, LON_OFFSET))?;
    Ok(CoreFields {
        prefix,
        lat_e7,
        lon_e7,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeId;

    /// One quantization step of longitude in 1e-7 degrees, rounded up.
    const LON_STEP_E7: i64 = 215;

    fn fields(lat_e7: i32, lon_e7: i32) -> CoreFields {
        CoreFields {
            prefix: Prefix::new(NodeId::new(0xA1B2_C3D4_E5F6), 7),
            lat_e7,
            lon_e7,
        }
    }

    #[test]
    fn header_bytes_are_exact() {
        let mut out = [0u8; FRAME_LEN];
        let n = encode(&fields(0, 0), &mut out).unwrap();
        assert_eq!(n, 17);
        assert_eq!(&out[..2], &[0x0F, 0x02]);
    }

    #[test]
    fn roundtrip_within_one_step() {
        let cases = [
            (0, 0),
            (557_558_000, 376_173_000),
            (-338_688_000, 1_512_093_000),
            (900_000_000, 1_800_000_000),
            (-900_000_000, -1_800_000_000),
        ];
        for (lat, lon) in cases {
            let mut out = [0u8; FRAME_LEN];
            encode(&fields(lat, lon), &mut out).unwrap();
            let back = decode(&out[HEADER_SIZE..]).unwrap();
            assert_eq!(back.prefix, fields(lat, lon).prefix);
            assert!((back.lat_e7 as i64 - lat as i64).abs() <= LON_STEP_E7);
            assert!((back.lon_e7 as i64 - lon as i64).abs() <= LON_STEP_E7);
        }
    }

    #[test]
    fn extremes_map_to_range_ends() {
        assert_eq!(lat_to_u24(-900_000_000), 0);
        assert_eq!(lat_to_u24(900_000_000), U24_MAX);
        assert_eq!(lon_to_u24(-1_800_000_000), 0);
        assert_eq!(lon_to_u24(1_800_000_000), U24_MAX);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(lat_to_u24(950_000_000), U24_MAX);
        assert_eq!(lat_to_u24(i32::MIN), 0);
    }

    #[test]
    fn u24_above_max_rejected() {
        assert_eq!(u24_to_lat(U24_MAX + 1), Err(DecodeError::OutOfRange));
        assert_eq!(u24_to_lon(0xFFFF_FFFF), Err(DecodeError::OutOfRange));
    }

    #[test]
    fn bad_lengths() {
        let mut out = [0u8; FRAME_LEN];
        encode(&fields(0, 0), &mut out).unwrap();
        let payload = &out[HEADER_SIZE..];
        assert!(matches!(
            decode(&payload[..14]),
            Err(DecodeError::ShortBuffer { len: 14, min: 15 })
        ));
        let mut long = payload.to_vec();
        long.push(0);
        assert_eq!(decode(&long), Err(DecodeError::BadLength(16)));
    }

    #[test]
    fn buffer_too_small() {
        let mut out = [0u8; FRAME_LEN - 1];
        assert!(matches!(
            encode(&fields(0, 0), &mut out),
            Err(EncodeError::BufferTooSmall { needed: 17, .. })
        ));
    }
}
