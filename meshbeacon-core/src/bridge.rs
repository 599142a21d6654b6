//! Companion bridge: device-info blob and paged node-table responses over a `CompanionTransport`.

use crate::hal::CompanionTransport;
use crate::identity::NodeId;
use crate::table::{PeerTable, RECORD_SIZE};

pub const DEVICE_INFO_FORMAT_VER: u8 = 1;
pub const SCHEMA_VER: u8 = 1;
pub const RECORD_FORMAT_VER: u8 = 1;

/// Records per response page.
pub const PAGE_SIZE: usize = 10;

pub const PAGE_HEADER_SIZE: usize = 10;

const MAX_STR_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub format_ver: u8,
    pub schema_ver: u8,
    /// Omitted from the blob when `None`.
    pub radio_proto_ver: Option<u8>,
    pub node_id: NodeId,
    pub device_type: u8,
    pub firmware_version: String,
    pub radio_model: String,
    pub capabilities: u32,
}

impl DeviceInfo {
    pub fn new(node_id: NodeId, firmware_version: impl Into<String>) -> Self {
        Self {
            format_ver: DEVICE_INFO_FORMAT_VER,
            schema_ver: SCHEMA_VER,
            radio_proto_ver: Some(crate::protocol::PAYLOAD_VERSION),
            node_id,
            device_type: 0,
            firmware_version: firmware_version.into(),
            radio_model: String::new(),
            capabilities: 0,
        }
    }

    /// LE blob. Strings are length-prefixed and truncated to 255 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.firmware_version.len() + self.radio_model.len());
        out.push(self.format_ver);
        out.push(self.schema_ver);
        out.extend(self.radio_proto_ver);
        out.extend_from_slice(&self.node_id.as_u64().to_le_bytes());
        out.extend_from_slice(&self.node_id.short_id().as_u16().to_le_bytes());
        out.push(self.device_type);
        push_str(&mut out, &self.firmware_version);
        push_str(&mut out, &self.radio_model);
        out.extend_from_slice(&self.capabilities.to_le_bytes());
        out
    }
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(MAX_STR_LEN)];
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

/// Header preceding the records of a node-table response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub snapshot_id: u16,
    pub total_nodes: u16,
    pub page_index: u16,
    pub page_size: u8,
    pub page_count: u16,
    pub record_format_ver: u8,
}

impl PageHeader {
    /// Write the 10-byte LE header into the front of `out`. Returns `false`, writing nothing,
    /// when `out` is shorter than `PAGE_HEADER_SIZE`.
    pub fn write_to(&self, out: &mut [u8]) -> bool {
        let Some(out) = out.get_mut(..PAGE_HEADER_SIZE) else {
            return false;
        };
        out[0..2].copy_from_slice(&self.snapshot_id.to_le_bytes());
        out[2..4].copy_from_slice(&self.total_nodes.to_le_bytes());
        out[4..6].copy_from_slice(&self.page_index.to_le_bytes());
        out[6] = self.page_size;
        out[7..9].copy_from_slice(&self.page_count.to_le_bytes());
        out[9] = self.record_format_ver;
        true
    }

    pub fn read_from(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..PAGE_HEADER_SIZE)?;
        Some(Self {
            snapshot_id: u16::from_le_bytes([b[0], b[1]]),
            total_nodes: u16::from_le_bytes([b[2], b[3]]),
            page_index: u16::from_le_bytes([b[4], b[5]]),
            page_size: b[6],
            page_count: u16::from_le_bytes([b[7], b[8]]),
            record_format_ver: b[9],
        })
    }
}

/// Build the response for a `(snapshot_id, page_index)` request. Id 0 or a superseded id
/// starts a new snapshot and answers page 0.
pub fn node_table_response(now_ms: u64, table: &mut PeerTable, request: (u16, u16)) -> Vec<u8> {
    let (requested_id, requested_page) = request;
    let (snapshot_id, total, page_index) = match table.snapshot_total(requested_id) {
        Some(total) => (requested_id, total, requested_page as usize),
        None => {
            let id = table.create_snapshot(now_ms);
            (id, table.snapshot_total(id).unwrap_or(0), 0)
        }
    };
    let page_count = total.div_ceil(PAGE_SIZE);
    let mut out = vec![0u8; PAGE_HEADER_SIZE + PAGE_SIZE * RECORD_SIZE];
    let written = table.get_snapshot_page(snapshot_id, page_index, PAGE_SIZE, &mut out[PAGE_HEADER_SIZE..]);
    out.truncate(PAGE_HEADER_SIZE + written);
    PageHeader {
        snapshot_id,
        total_nodes: total.min(u16::MAX as usize) as u16,
        page_index: page_index as u16,
        page_size: PAGE_SIZE as u8,
        page_count: page_count as u16,
        record_format_ver: RECORD_FORMAT_VER,
    }
    .write_to(&mut out);
    out
}

/// Push device info and the currently requested table page to the transport.
pub fn publish<T: CompanionTransport + ?Sized>(
    now_ms: u64,
    info: &DeviceInfo,
    table: &mut PeerTable,
    transport: &mut T,
) {
    transport.set_device_info(&info.encode());
    let response = node_table_response(now_ms, table, transport.node_table_request());
    transport.set_node_table_response(&response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{NodeRecord, Position, RemoteUpdate};

    #[derive(Default)]
    struct FakeTransport {
        info: Vec<u8>,
        response: Vec<u8>,
        request: (u16, u16),
    }

    impl CompanionTransport for FakeTransport {
        fn set_device_info(&mut self, blob: &[u8]) {
            self.info = blob.to_vec();
        }
        fn set_node_table_response(&mut self, blob: &[u8]) {
            self.response = blob.to_vec();
        }
        fn node_table_request(&self) -> (u16, u16) {
            self.request
        }
    }

    fn table_with(n: u64) -> PeerTable {
        let mut t = PeerTable::new(64);
        for id in 1..=n {
            t.upsert_remote(
                &RemoteUpdate {
                    node_id: NodeId::new(id),
                    position: Some(Position::default()),
                    pos_age_s: 0,
                    rssi: -80,
                    seq: 1,
                },
                0,
            );
        }
        t
    }

    #[test]
    fn device_info_layout() {
        let mut info = DeviceInfo::new(NodeId::new(0x0102_0304_0506), "1.2");
        info.radio_model = "SX1262".into();
        info.capabilities = 0xA0B0_C0D0;
        let blob = info.encode();
        assert_eq!(&blob[0..3], &[1, 1, 0]);
        assert_eq!(&blob[3..11], &0x0102_0304_0506u64.to_le_bytes());
        let sid = NodeId::new(0x0102_0304_0506).short_id().as_u16();
        assert_eq!(&blob[11..13], &sid.to_le_bytes());
        assert_eq!(blob[13], 0);
        assert_eq!(&blob[14..17], &[3, b'1', b'.']);
        assert_eq!(blob[17], b'2');
        assert_eq!(blob[18], 6);
        assert_eq!(&blob[25..29], &0xA0B0_C0D0u32.to_le_bytes());
        assert_eq!(blob.len(), 29);
    }

    #[test]
    fn radio_proto_ver_optional() {
        let mut info = DeviceInfo::new(NodeId::new(1), "");
        let with = info.encode().len();
        info.radio_proto_ver = None;
        assert_eq!(info.encode().len(), with - 1);
    }

    #[test]
    fn long_strings_truncated() {
        let info = DeviceInfo::new(NodeId::new(1), "x".repeat(300));
        let blob = info.encode();
        assert_eq!(blob[14], 255);
    }

    #[test]
    fn first_request_creates_snapshot() {
        let mut t = table_with(23);
        let resp = node_table_response(0, &mut t, (0, 5));
        let h = PageHeader::read_from(&resp).unwrap();
        assert_ne!(h.snapshot_id, 0);
        assert_eq!(h.total_nodes, 23);
        assert_eq!(h.page_index, 0);
        assert_eq!(h.page_size, 10);
        assert_eq!(h.page_count, 3);
        assert_eq!(h.record_format_ver, 1);
        assert_eq!(resp.len(), PAGE_HEADER_SIZE + 10 * RECORD_SIZE);
    }

    #[test]
    fn paging_through_snapshot_is_stable() {
        let mut t = table_with(23);
        let first = PageHeader::read_from(&node_table_response(0, &mut t, (0, 0))).unwrap();
        t.upsert_remote(
            &RemoteUpdate {
                node_id: NodeId::new(999),
                position: None,
                pos_age_s: 0,
                rssi: 0,
                seq: 1,
            },
            100,
        );
        let resp = node_table_response(200, &mut t, (first.snapshot_id, 2));
        let h = PageHeader::read_from(&resp).unwrap();
        assert_eq!(h.snapshot_id, first.snapshot_id);
        assert_eq!(h.total_nodes, 23);
        assert_eq!(h.page_index, 2);
        assert_eq!(resp.len(), PAGE_HEADER_SIZE + 3 * RECORD_SIZE);
        let last = NodeRecord::read_from(&resp[PAGE_HEADER_SIZE + 2 * RECORD_SIZE..]).unwrap();
        assert_eq!(last.node_id, NodeId::new(23));
    }

    #[test]
    fn short_header_buffer_is_refused() {
        let h = PageHeader {
            snapshot_id: 1,
            total_nodes: 2,
            page_index: 0,
            page_size: 10,
            page_count: 1,
            record_format_ver: RECORD_FORMAT_VER,
        };
        let mut short = [0xEEu8; PAGE_HEADER_SIZE - 1];
        assert!(!h.write_to(&mut short));
        assert!(short.iter().all(|b| *b == 0xEE));
        let mut buf = [0u8; PAGE_HEADER_SIZE + 3];
        assert!(h.write_to(&mut buf));
        assert_eq!(PageHeader::read_from(&buf), Some(h));
    }

    #[test]
    fn stale_id_restarts_at_page_zero() {
        let mut t = table_with(3);
        let old = PageHeader::read_from(&node_table_response(0, &mut t, (0, 0))).unwrap();
        t.create_snapshot(0);
        let resp = node_table_response(0, &mut t, (old.snapshot_id, 1));
        let h = PageHeader::read_from(&resp).unwrap();
        assert_ne!(h.snapshot_id, old.snapshot_id);
        assert_eq!(h.page_index, 0);
        assert_eq!(h.total_nodes, 3);
    }

    #[test]
    fn empty_table_has_no_pages() {
        let mut t = PeerTable::new(4);
        let resp = node_table_response(0, &mut t, (0, 0));
        let h = PageHeader::read_from(&resp).unwrap();
        assert_eq!(h.total_nodes, 0);
        assert_eq!(h.page_count, 0);
        assert_eq!(resp.len(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn publish_fills_transport() {
        let mut t = table_with(2);
        let mut tr = FakeTransport::default();
        publish(0, &DeviceInfo::new(NodeId::new(7), "fw"), &mut t, &mut tr);
        assert!(!tr.info.is_empty());
        assert_eq!(tr.response.len(), PAGE_HEADER_SIZE + 2 * RECORD_SIZE);
    }
}
