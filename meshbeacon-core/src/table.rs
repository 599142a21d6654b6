//! Peer table: fixed-capacity node store with short-id collision flags, read-time staleness,
//! stale-only eviction and frozen paginated snapshots.

use crate::codec::{InfoFields, Tail1Fields, Tail2Fields};
use crate::identity::{NodeId, ShortId};

pub const DEFAULT_CAPACITY: usize = 100;

/// Encoded size of one page record.
pub const RECORD_SIZE: usize = 26;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Record flag bits.
pub const FLAG_SELF: u8 = 0x01;
pub const FLAG_POS_VALID: u8 = 0x02;
pub const FLAG_STALE: u8 = 0x04;
pub const FLAG_COLLISION: u8 = 0x08;

const MIN_GRACE_S: u64 = 2;

/// Position in 1e-7 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub lat_e7: i32,
    pub lon_e7: i32,
}

/// Tail-1 data. `seq` is the prefix seq of the frame that last wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionQuality {
    pub pos_flags: Option<u8>,
    pub sats: Option<u8>,
    pub seq: u16,
}

/// Tail-2 data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operational {
    pub battery_pct: Option<u8>,
    pub uptime_s: Option<u32>,
    pub seq: u16,
}

/// Info data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Informative {
    pub max_silence_10s: Option<u8>,
    pub hw_profile_id: Option<u16>,
    pub fw_version_id: Option<u16>,
    pub seq: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub node_id: NodeId,
    pub short_id: ShortId,
    pub is_self: bool,
    /// `None` when the position is not valid.
    pub position: Option<Position>,
    pub pos_age_s: u16,
    pub last_rssi: i8,
    pub last_seen_ms: u64,
    pub last_seq: u16,
    /// Linkage key for Tail-1.
    pub last_core_seq: Option<u16>,
    pub collision: bool,
    pub quality: Option<PositionQuality>,
    pub operational: Option<Operational>,
    pub informative: Option<Informative>,
}

impl NodeEntry {
    fn new(node_id: NodeId, now_ms: u64) -> Self {
        Self {
            node_id,
            short_id: node_id.short_id(),
            is_self: false,
            position: None,
            pos_age_s: 0,
            last_rssi: 0,
            last_seen_ms: now_ms,
            last_seq: 0,
            last_core_seq: None,
            collision: false,
            quality: None,
            operational: None,
            informative: None,
        }
    }
}

/// Core/Alive ingestion for a remote node. `position: None` is a liveness-only update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub node_id: NodeId,
    pub position: Option<Position>,
    pub pos_age_s: u16,
    pub rssi: i8,
    pub seq: u16,
}

/// Result of applying a received frame to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    /// Same seq as the last applied frame of this kind, or for Core/Alive a seq that is not
    /// newer. Only liveness and RSSI may have been refreshed.
    Duplicate,
    /// Tail-1 without a matching Core seq. Nothing changed.
    Unlinked,
    /// Table full with no stale victim.
    Refused,
    /// Frame carries our own node id.
    Ignored,
}

/// One page record, as encoded on the companion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub short_id: u16,
    pub flags: u8,
    pub age_s: u16,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub pos_age_s: u16,
    pub rssi: i8,
    pub last_seq: u16,
}

impl NodeRecord {
    pub fn is_stale(&self) -> bool {
        self.flags & FLAG_STALE != 0
    }

    /// Write the 26-byte LE record into the front of `out`. Returns `false`, writing nothing,
    /// when `out` is shorter than `RECORD_SIZE`.
    pub fn write_to(&self, out: &mut [u8]) -> bool {
        let Some(out) = out.get_mut(..RECORD_SIZE) else {
            return false;
        };
        out[0..8].copy_from_slice(&self.node_id.as_u64().to_le_bytes());
        out[8..10].copy_from_slice(&self.short_id.to_le_bytes());
        out[10] = self.flags;
        out[11..13].copy_from_slice(&self.age_s.to_le_bytes());
        out[13..17].copy_from_slice(&self.lat_e7.to_le_bytes());
        out[17..21].copy_from_slice(&self.lon_e7.to_le_bytes());
        out[21..23].copy_from_slice(&self.pos_age_s.to_le_bytes());
        out[23] = self.rssi as u8;
        out[24..26].copy_from_slice(&self.last_seq.to_le_bytes());
        true
    }

    pub fn read_from(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..RECORD_SIZE)?;
        let u16_at = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let i32_at = |i: usize| i32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&b[0..8]);
        Some(Self {
            node_id: NodeId::new(u64::from_le_bytes(id)),
            short_id: u16_at(8),
            flags: b[10],
            age_s: u16_at(11),
            lat_e7: i32_at(13),
            lon_e7: i32_at(17),
            pos_age_s: u16_at(21),
            rssi: b[23] as i8,
            last_seq: u16_at(24),
        })
    }
}

/// Position of an incoming seq relative to the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqOrder {
    Same,
    Newer,
    Older,
}

/// Compare on the wrapping 16-bit ring: a forward distance of 1..=32767 is newer, anything
/// else other than zero is older.
pub fn seq16_order(incoming: u16, last: u16) -> SeqOrder {
    match incoming.wrapping_sub(last) {
        0 => SeqOrder::Same,
        d if d <= 0x7FFF => SeqOrder::Newer,
        _ => SeqOrder::Older,
    }
}

/// Grace period for a given expected interval: round(0.25 * interval), at least 2.
pub fn grace_s(expected_interval_s: u16) -> u64 {
    let interval = expected_interval_s as u64;
    ((interval * 25 + 50) / 100).max(MIN_GRACE_S)
}

struct Snapshot {
    id: u16,
    as_of_ms: u64,
    records: Vec<NodeRecord>,
}

pub struct PeerTable {
    slots: Vec<Option<NodeEntry>>,
    len: usize,
    self_index: Option<usize>,
    expected_interval_s: u16,
    last_snapshot_id: u16,
    snapshot: Snapshot,
}

impl PeerTable {
    /// Empty table with room for `capacity` entries, self included. A capacity of 0 becomes 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            len: 0,
            self_index: None,
            expected_interval_s: 0,
            last_snapshot_id: 0,
            snapshot: Snapshot {
                id: 0,
                as_of_ms: 0,
                records: Vec::with_capacity(capacity),
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live entries, self included.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.slots.len()
    }

    /// Expected reporting interval in seconds. 0 disables staleness.
    pub fn set_expected_interval_s(&mut self, interval_s: u16) {
        self.expected_interval_s = interval_s;
    }

    /// Look up a node by full id. Short ids are not unique and are never used as a key.
    pub fn find(&self, node_id: NodeId) -> Option<&NodeEntry> {
        self.index_of(node_id).and_then(|i| self.slots[i].as_ref())
    }

    pub fn self_entry(&self) -> Option<&NodeEntry> {
        self.self_index.and_then(|i| self.slots[i].as_ref())
    }

    /// Stale iff staleness is enabled and age exceeds interval + grace. Read-time only.
    pub fn is_stale(&self, entry: &NodeEntry, now_ms: u64) -> bool {
        if self.expected_interval_s == 0 {
            return false;
        }
        let age_s = now_ms.saturating_sub(entry.last_seen_ms) / 1000;
        age_s > self.expected_interval_s as u64 + grace_s(self.expected_interval_s)
    }

    /// Create or re-flag the self entry. Position is reset to invalid. A previous self entry
    /// under another id becomes an ordinary remote, so at most one entry is ever self.
    /// On a full table evicts the oldest stale remote, or failing that the oldest remote.
    pub fn init_self(&mut self, node_id: NodeId, now_ms: u64) -> bool {
        if let Some(old) = self.self_index.take() {
            if let Some(entry) = self.slots[old].as_mut() {
                if entry.node_id != node_id {
                    log::info!("peer table: self id {} replaced by {}", entry.node_id, node_id);
                }
                entry.is_self = false;
            }
        }
        if let Some(i) = self.index_of(node_id) {
            if let Some(entry) = self.slots[i].as_mut() {
                entry.is_self = true;
                entry.last_seen_ms = now_ms;
                entry.position = None;
                entry.pos_age_s = 0;
            }
            self.self_index = Some(i);
            self.recompute_collisions();
            return true;
        }
        let index = match self.free_slot() {
            Some(i) => Some(i),
            None => self
                .evict_oldest_stale(now_ms)
                .or_else(|| self.evict_oldest_remote()),
        };
        let Some(index) = index else {
            log::warn!("peer table: no room for self entry {}", node_id);
            return false;
        };
        let mut entry = NodeEntry::new(node_id, now_ms);
        entry.is_self = true;
        self.slots[index] = Some(entry);
        self.len += 1;
        self.self_index = Some(index);
        self.recompute_collisions();
        true
    }

    pub fn update_self_position(&mut self, position: Position, pos_age_s: u16, now_ms: u64) {
        if let Some(entry) = self.self_mut() {
            entry.position = Some(position);
            entry.pos_age_s = pos_age_s;
            entry.last_seen_ms = now_ms;
        }
    }

    /// Mark the self position invalid, e.g. after losing the fix.
    pub fn clear_self_position(&mut self) {
        if let Some(entry) = self.self_mut() {
            entry.position = None;
            entry.pos_age_s = 0;
        }
    }

    /// Liveness without position.
    pub fn touch_self(&mut self, now_ms: u64) {
        if let Some(entry) = self.self_mut() {
            entry.last_seen_ms = now_ms;
        }
    }

    /// Record our own last transmitted seq so the self record reports it.
    pub fn set_self_seq(&mut self, seq: u16) {
        if let Some(entry) = self.self_mut() {
            entry.last_seq = seq;
        }
    }

    /// Core/Alive ingestion. Creates the entry if new.
    ///
    /// A seq newer on the 16-bit ring than the last accepted one replaces position, `last_seq`
    /// and the Tail-1 linkage key. A same or older seq only refreshes last-seen and RSSI and
    /// reports `Duplicate`. An entry with no accepted Core/Alive yet takes any seq.
    pub fn upsert_remote(&mut self, update: &RemoteUpdate, now_ms: u64) -> ApplyResult {
        let index = match self.index_of(update.node_id) {
            Some(i) => i,
            None => match self.admit(update.node_id, now_ms) {
                Some(i) => i,
                None => return ApplyResult::Refused,
            },
        };
        let Some(entry) = self.slots[index].as_mut() else {
            return ApplyResult::Refused;
        };
        if entry.is_self {
            return ApplyResult::Ignored;
        }
        entry.last_rssi = update.rssi;
        entry.last_seen_ms = now_ms;
        if let Some(last) = entry.last_core_seq {
            if seq16_order(update.seq, last) != SeqOrder::Newer {
                return ApplyResult::Duplicate;
            }
        }
        entry.position = update.position;
        entry.pos_age_s = if update.position.is_some() {
            update.pos_age_s
        } else {
            0
        };
        entry.last_seq = update.seq;
        entry.last_core_seq = Some(update.seq);
        ApplyResult::Applied
    }

    /// Tail-1: applied only when the node exists with a Core seq equal to the back-reference.
    pub fn apply_tail1(&mut self, fields: &Tail1Fields, rssi: i8, now_ms: u64) -> ApplyResult {
        let Some(entry) = self
            .index_of(fields.prefix.node_id)
            .and_then(|i| self.slots[i].as_mut())
        else {
            return ApplyResult::Unlinked;
        };
        if entry.is_self {
            return ApplyResult::Ignored;
        }
        if entry.last_core_seq != Some(fields.ref_core_seq) {
            return ApplyResult::Unlinked;
        }
        if entry.quality.is_some_and(|q| q.seq == fields.prefix.seq) {
            return ApplyResult::Duplicate;
        }
        let prev = entry.quality;
        entry.quality = Some(PositionQuality {
            pos_flags: fields.pos_flags.or(prev.and_then(|q| q.pos_flags)),
            sats: fields.sats.or(prev.and_then(|q| q.sats)),
            seq: fields.prefix.seq,
        });
        entry.last_rssi = rssi;
        entry.last_seen_ms = now_ms;
        ApplyResult::Applied
    }

    /// Tail-2: unconditional, may create the entry. Never touches position.
    pub fn apply_tail2(&mut self, fields: &Tail2Fields, rssi: i8, now_ms: u64) -> ApplyResult {
        let entry = match self.aux_entry(fields.prefix.node_id, now_ms) {
            Ok(entry) => entry,
            Err(result) => return result,
        };
        if entry.operational.is_some_and(|o| o.seq == fields.prefix.seq) {
            return ApplyResult::Duplicate;
        }
        let prev = entry.operational;
        entry.operational = Some(Operational {
            battery_pct: fields.battery_pct.or(prev.and_then(|o| o.battery_pct)),
            uptime_s: fields.uptime_s.or(prev.and_then(|o| o.uptime_s)),
            seq: fields.prefix.seq,
        });
        entry.last_rssi = rssi;
        entry.last_seen_ms = now_ms;
        ApplyResult::Applied
    }

    /// Info: unconditional, may create the entry. Never touches position.
    pub fn apply_info(&mut self, fields: &InfoFields, rssi: i8, now_ms: u64) -> ApplyResult {
        let entry = match self.aux_entry(fields.prefix.node_id, now_ms) {
            Ok(entry) => entry,
            Err(result) => return result,
        };
        if entry.informative.is_some_and(|i| i.seq == fields.prefix.seq) {
            return ApplyResult::Duplicate;
        }
        let prev = entry.informative;
        entry.informative = Some(Informative {
            max_silence_10s: fields
                .max_silence_10s
                .or(prev.and_then(|i| i.max_silence_10s)),
            hw_profile_id: fields.hw_profile_id.or(prev.and_then(|i| i.hw_profile_id)),
            fw_version_id: fields.fw_version_id.or(prev.and_then(|i| i.fw_version_id)),
            seq: fields.prefix.seq,
        });
        entry.last_rssi = rssi;
        entry.last_seen_ms = now_ms;
        ApplyResult::Applied
    }

    /// Write up to `page_size` live records of page `page_index` into `out`. Returns bytes written.
    pub fn get_page(&self, now_ms: u64, page_index: usize, page_size: usize, out: &mut [u8]) -> usize {
        let records: Vec<NodeRecord> = self
            .ordered_indices()
            .into_iter()
            .filter_map(|i| self.slots[i].as_ref())
            .map(|e| self.record(e, now_ms))
            .collect();
        write_page(&records, page_index, page_size, out)
    }

    /// Freeze the ordered records and the as-of time. Returns the new snapshot id (never 0).
    pub fn create_snapshot(&mut self, now_ms: u64) -> u16 {
        let mut id = self.last_snapshot_id.wrapping_add(1);
        if id == 0 {
            id = 1;
        }
        self.last_snapshot_id = id;
        let mut records = std::mem::take(&mut self.snapshot.records);
        records.clear();
        for i in self.ordered_indices() {
            if let Some(entry) = self.slots[i].as_ref() {
                records.push(self.record(entry, now_ms));
            }
        }
        self.snapshot = Snapshot {
            id,
            as_of_ms: now_ms,
            records,
        };
        log::debug!("peer table: snapshot {} with {} records", id, self.snapshot.records.len());
        id
    }

    /// Page of a frozen snapshot. A superseded or unknown id yields 0 bytes.
    pub fn get_snapshot_page(
        &self,
        snapshot_id: u16,
        page_index: usize,
        page_size: usize,
        out: &mut [u8],
    ) -> usize {
        if snapshot_id == 0 || snapshot_id != self.snapshot.id {
            return 0;
        }
        write_page(&self.snapshot.records, page_index, page_size, out)
    }

    /// Total record count of the current snapshot, if `snapshot_id` is current.
    pub fn snapshot_total(&self, snapshot_id: u16) -> Option<usize> {
        (snapshot_id != 0 && snapshot_id == self.snapshot.id).then_some(self.snapshot.records.len())
    }

    pub fn snapshot_as_of_ms(&self, snapshot_id: u16) -> Option<u64> {
        (snapshot_id != 0 && snapshot_id == self.snapshot.id).then_some(self.snapshot.as_of_ms)
    }

    /// Diagnostic line for the `peer_index`-th non-self entry in page order.
    pub fn get_peer_dump_line(&self, now_ms: u64, peer_index: usize) -> Option<String> {
        let entry = self
            .ordered_indices()
            .into_iter()
            .filter_map(|i| self.slots[i].as_ref())
            .filter(|e| !e.is_self)
            .nth(peer_index)?;
        let r = self.record(entry, now_ms);
        Some(format!(
            "peer shortId={} ageS={} grey={} seq={} rssi={} posAgeS={}",
            r.short_id,
            r.age_s,
            u8::from(r.is_stale()),
            r.last_seq,
            r.rssi,
            r.pos_age_s
        ))
    }

    fn record(&self, entry: &NodeEntry, now_ms: u64) -> NodeRecord {
        let mut flags = 0;
        if entry.is_self {
            flags |= FLAG_SELF;
        }
        if entry.position.is_some() {
            flags |= FLAG_POS_VALID;
        }
        if self.is_stale(entry, now_ms) {
            flags |= FLAG_STALE;
        }
        if entry.collision {
            flags |= FLAG_COLLISION;
        }
        let age_s = now_ms.saturating_sub(entry.last_seen_ms) / 1000;
        let pos = entry.position.unwrap_or_default();
        NodeRecord {
            node_id: entry.node_id,
            short_id: entry.short_id.as_u16(),
            flags,
            age_s: age_s.min(u16::MAX as u64) as u16,
            lat_e7: pos.lat_e7,
            lon_e7: pos.lon_e7,
            pos_age_s: if entry.position.is_some() {
                entry.pos_age_s
            } else {
                0
            },
            rssi: entry.last_rssi,
            last_seq: entry.last_seq,
        }
    }

    /// Self first, then remotes by node id ascending.
    fn ordered_indices(&self) -> Vec<usize> {
        let mut remotes: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_ref().is_some_and(|e| !e.is_self))
            .map(|(i, _)| i)
            .collect();
        remotes.sort_by_key(|&i| self.slots[i].as_ref().map(|e| e.node_id));
        let mut out = Vec::with_capacity(self.len);
        out.extend(self.self_index);
        out.extend(remotes);
        out
    }

    fn index_of(&self, node_id: NodeId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|e| e.node_id == node_id))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn self_mut(&mut self) -> Option<&mut NodeEntry> {
        let i = self.self_index?;
        self.slots[i].as_mut()
    }

    /// Existing non-self entry for an auxiliary frame, creating it if needed.
    fn aux_entry(&mut self, node_id: NodeId, now_ms: u64) -> Result<&mut NodeEntry, ApplyResult> {
        let index = match self.index_of(node_id) {
            Some(i) => i,
            None => self.admit(node_id, now_ms).ok_or(ApplyResult::Refused)?,
        };
        match self.slots[index].as_mut() {
            Some(entry) if entry.is_self => Err(ApplyResult::Ignored),
            Some(entry) => Ok(entry),
            None => Err(ApplyResult::Refused),
        }
    }

    /// Place a fresh remote entry, evicting the oldest stale remote if full.
    fn admit(&mut self, node_id: NodeId, now_ms: u64) -> Option<usize> {
        let index = match self.free_slot() {
            Some(i) => i,
            None => match self.evict_oldest_stale(now_ms) {
                Some(i) => i,
                None => {
                    log::warn!("peer table full, refusing {}", node_id);
                    return None;
                }
            },
        };
        self.slots[index] = Some(NodeEntry::new(node_id, now_ms));
        self.len += 1;
        self.recompute_collisions();
        log::debug!("peer table: admitted {} ({} entries)", node_id, self.len);
        Some(index)
    }

    fn evict_oldest_stale(&mut self, now_ms: u64) -> Option<usize> {
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| !e.is_self && self.is_stale(e, now_ms))
            .min_by_key(|(_, e)| e.last_seen_ms)
            .map(|(i, _)| i)?;
        self.evict(victim);
        Some(victim)
    }

    fn evict_oldest_remote(&mut self) -> Option<usize> {
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| !e.is_self)
            .min_by_key(|(_, e)| e.last_seen_ms)
            .map(|(i, _)| i)?;
        self.evict(victim);
        Some(victim)
    }

    fn evict(&mut self, index: usize) {
        if let Some(entry) = self.slots[index].take() {
            self.len -= 1;
            log::debug!("peer table: evicted {}", entry.node_id);
            self.recompute_collisions();
        }
    }

    fn recompute_collisions(&mut self) {
        let n = self.slots.len();
        for i in 0..n {
            let Some(a) = self.slots[i].as_ref() else {
                continue;
            };
            let (id, sid) = (a.node_id, a.short_id);
            let collides = (0..n).any(|j| {
                j != i
                    && self.slots[j]
                        .as_ref()
                        .is_some_and(|b| b.short_id == sid && b.node_id != id)
            });
            if let Some(entry) = self.slots[i].as_mut() {
                entry.collision = collides;
            }
        }
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn write_page(records: &[NodeRecord], page_index: usize, page_size: usize, out: &mut [u8]) -> usize {
    if page_size == 0 || out.len() < RECORD_SIZE {
        return 0;
    }
    let Some(start) = page_index.checked_mul(page_size) else {
        return 0;
    };
    if start >= records.len() {
        return 0;
    }
    let count = (records.len() - start)
        .min(page_size)
        .min(out.len() / RECORD_SIZE);
    for (k, record) in records[start..start + count].iter().enumerate() {
        record.write_to(&mut out[k * RECORD_SIZE..(k + 1) * RECORD_SIZE]);
    }
    count * RECORD_SIZE
}
