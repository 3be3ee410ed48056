// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Chunks: the partitions inside a shard that hold the actual publisher and
//! subscriber records.
//!
//! A chunk is keyed per its shard's flavor (an exact packed key for IDENT, an
//! auto-generated id for NULL, a numeric interval plus id for RANGE) and holds
//! two maps of records keyed by message path. Repeated registration of the
//! same path under the same role is additive, not deduplicated: the common
//! single-record case stays allocation-free via [`RecordEntry::Single`] and
//! duplicates upgrade the entry to a small list.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::rc::Rc;

use crate::protocols::{MemberRecord, RecordKind, RecordRole};
use crate::shard::WeakShardRef;

/// Shared reference to a chunk.
pub type ChunkRef = Rc<RefCell<Chunk>>;

/// Per-flavor chunk key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKey {
    /// Exact packed key bytes (IDENT flavor).
    Ident(Vec<u8>),
    /// Auto-generated id (NULL flavor).
    Auto(u64),
    /// Numeric interval with its own auto id (RANGE flavor). Overflow chunks
    /// share `[start, end]` under a fresh id.
    Range { id: u64, start: i64, end: i64 },
}

impl ChunkKey {
    /// The auto id, for NULL/RANGE chunks.
    pub fn id(&self) -> Option<u64> {
        match self {
            ChunkKey::Ident(_) => None,
            ChunkKey::Auto(id) | ChunkKey::Range { id, .. } => Some(*id),
        }
    }

    /// Whether a numeric value falls inside this chunk's interval.
    /// Always false for non-RANGE keys.
    pub fn contains(&self, value: i64) -> bool {
        match self {
            ChunkKey::Range { start, end, .. } => *start <= value && value <= *end,
            _ => false,
        }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkKey::Ident(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            ChunkKey::Auto(id) => write!(f, "#{id}"),
            ChunkKey::Range { id, start, end } => write!(f, "#{id}[{start},{end}]"),
        }
    }
}

/// Entry for one message path within a record map.
///
/// Optimizes for the common case of a single record per path; duplicate
/// registrations (additive, relied on the caller not to double-register)
/// upgrade to a list.
#[derive(Debug)]
enum RecordEntry {
    Single(MemberRecord),
    Multi(Vec<MemberRecord>),
}

impl RecordEntry {
    fn len(&self) -> usize {
        match self {
            RecordEntry::Single(_) => 1,
            RecordEntry::Multi(records) => records.len(),
        }
    }

    fn push(&mut self, record: MemberRecord) {
        match self {
            RecordEntry::Single(_) => {
                let RecordEntry::Single(existing) =
                    std::mem::replace(self, RecordEntry::Multi(Vec::with_capacity(2)))
                else {
                    unreachable!()
                };
                let RecordEntry::Multi(records) = self else {
                    unreachable!()
                };
                records.push(existing);
                records.push(record);
            }
            RecordEntry::Multi(records) => records.push(record),
        }
    }

    fn first(&self) -> &MemberRecord {
        match self {
            RecordEntry::Single(record) => record,
            RecordEntry::Multi(records) => &records[0],
        }
    }

    fn first_mut(&mut self) -> &mut MemberRecord {
        match self {
            RecordEntry::Single(record) => record,
            RecordEntry::Multi(records) => &mut records[0],
        }
    }

    /// Keep only records matching the predicate; false means the whole entry
    /// is empty and should be removed from its map.
    fn retain(&mut self, keep: &mut dyn FnMut(&MemberRecord) -> bool) -> bool {
        match self {
            RecordEntry::Single(record) => keep(record),
            RecordEntry::Multi(records) => {
                records.retain(|r| keep(r));
                !records.is_empty()
            }
        }
    }

    fn iter(&self) -> impl Iterator<Item = &MemberRecord> {
        let single = match self {
            RecordEntry::Single(record) => Some(record),
            RecordEntry::Multi(_) => None,
        };
        let multi = match self {
            RecordEntry::Multi(records) => Some(records.iter()),
            RecordEntry::Single(_) => None,
        };
        single.into_iter().chain(multi.into_iter().flatten())
    }
}

/// The publisher and subscriber maps of a chunk, keyed by message path, with
/// explicit per-role counters.
#[derive(Debug, Default)]
pub struct RecordMaps {
    pubs: HashMap<String, RecordEntry>,
    subs: HashMap<String, RecordEntry>,
    num_pubs: usize,
    num_subs: usize,
}

impl RecordMaps {
    fn map(&self, role: RecordRole) -> &HashMap<String, RecordEntry> {
        match role {
            RecordRole::Publisher => &self.pubs,
            RecordRole::Subscriber => &self.subs,
        }
    }

    /// Insert a record into the map selected by its role flag.
    pub fn insert(&mut self, record: MemberRecord) {
        let role = record.flags.role;
        let (map, count) = match role {
            RecordRole::Publisher => (&mut self.pubs, &mut self.num_pubs),
            RecordRole::Subscriber => (&mut self.subs, &mut self.num_subs),
        };
        match map.entry(record.message_path.clone()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => entry.get_mut().push(record),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(RecordEntry::Single(record));
            }
        }
        *count += 1;
    }

    /// Remove one record for the message path under the given role.
    pub fn remove(&mut self, path: &str, role: RecordRole) -> Option<MemberRecord> {
        let (map, count) = match role {
            RecordRole::Publisher => (&mut self.pubs, &mut self.num_pubs),
            RecordRole::Subscriber => (&mut self.subs, &mut self.num_subs),
        };
        let record = match map.remove(path)? {
            RecordEntry::Single(record) => record,
            RecordEntry::Multi(mut records) => {
                let record = records.pop().expect("multi entry cannot be empty");
                if !records.is_empty() {
                    map.insert(path.to_string(), RecordEntry::Multi(records));
                }
                record
            }
        };
        *count = count.checked_sub(1).expect("record count underflow");
        Some(record)
    }

    pub fn get(&self, path: &str, role: RecordRole) -> Option<&MemberRecord> {
        self.map(role).get(path).map(|entry| entry.first())
    }

    pub fn get_mut(&mut self, path: &str, role: RecordRole) -> Option<&mut MemberRecord> {
        let map = match role {
            RecordRole::Publisher => &mut self.pubs,
            RecordRole::Subscriber => &mut self.subs,
        };
        map.get_mut(path).map(|entry| entry.first_mut())
    }

    /// Move one record for the path from the subscriber map to the publisher
    /// map in place, flipping its role flag. The record's storage (handle,
    /// path, other flags) is unchanged.
    pub fn promote(&mut self, path: &str) -> Option<&MemberRecord> {
        let mut record = self.remove(path, RecordRole::Subscriber)?;
        record.flags.role = RecordRole::Publisher;
        self.insert(record);
        self.get(path, RecordRole::Publisher)
    }

    /// Keep only records matching the predicate, fixing up both counters.
    pub fn retain(&mut self, mut keep: impl FnMut(&MemberRecord) -> bool) {
        self.pubs.retain(|_, entry| entry.retain(&mut keep));
        self.subs.retain(|_, entry| entry.retain(&mut keep));
        self.num_pubs = self.pubs.values().map(RecordEntry::len).sum();
        self.num_subs = self.subs.values().map(RecordEntry::len).sum();
    }

    pub fn publisher_count(&self) -> usize {
        self.num_pubs
    }

    pub fn subscriber_count(&self) -> usize {
        self.num_subs
    }

    pub fn total(&self) -> usize {
        self.num_pubs + self.num_subs
    }

    /// All records, publishers first.
    pub fn iter(&self) -> impl Iterator<Item = &MemberRecord> {
        self.pubs
            .values()
            .flat_map(RecordEntry::iter)
            .chain(self.subs.values().flat_map(RecordEntry::iter))
    }
}

/// A partition inside a shard, holding either application member records or
/// peer-router records depending on the owning tree's [`RecordKind`].
#[derive(Debug)]
pub struct Chunk {
    pub(crate) chunk_key: ChunkKey,
    /// Back-pointer to the owning shard; non-owning to keep the ownership
    /// graph acyclic.
    pub(crate) parent: WeakShardRef,
    pub(crate) elems: ChunkElems,
}

#[derive(Debug)]
pub(crate) enum ChunkElems {
    Member(RecordMaps),
    Router(RecordMaps),
}

impl Chunk {
    pub(crate) fn new(chunk_key: ChunkKey, parent: WeakShardRef, kind: RecordKind) -> ChunkRef {
        let elems = match kind {
            RecordKind::Member => ChunkElems::Member(RecordMaps::default()),
            RecordKind::Router => ChunkElems::Router(RecordMaps::default()),
        };
        Rc::new(RefCell::new(Self {
            chunk_key,
            parent,
            elems,
        }))
    }

    pub fn chunk_key(&self) -> &ChunkKey {
        &self.chunk_key
    }

    pub fn kind(&self) -> RecordKind {
        match self.elems {
            ChunkElems::Member(_) => RecordKind::Member,
            ChunkElems::Router(_) => RecordKind::Router,
        }
    }

    pub fn parent(&self) -> WeakShardRef {
        self.parent.clone()
    }

    pub fn records(&self) -> &RecordMaps {
        match &self.elems {
            ChunkElems::Member(maps) | ChunkElems::Router(maps) => maps,
        }
    }

    pub fn records_mut(&mut self) -> &mut RecordMaps {
        match &mut self.elems {
            ChunkElems::Member(maps) | ChunkElems::Router(maps) => maps,
        }
    }

    pub fn is_full(&self, capacity: usize) -> bool {
        self.records().total() >= capacity
    }
}

/// Per-shard chunk index, keyed per flavor. NULL and RANGE chunks share the
/// id-ordered map so "first" and "next" follow id order deterministically.
#[derive(Debug, Default)]
pub enum ChunkIndex {
    /// No flavor set yet; no chunks.
    #[default]
    Unset,
    Ident(HashMap<Vec<u8>, ChunkRef>),
    Auto(BTreeMap<u64, ChunkRef>),
}

impl ChunkIndex {
    pub fn len(&self) -> usize {
        match self {
            ChunkIndex::Unset => 0,
            ChunkIndex::Ident(map) => map.len(),
            ChunkIndex::Auto(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_ident(&self, key: &[u8]) -> Option<ChunkRef> {
        match self {
            ChunkIndex::Ident(map) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// Lowest-id chunk. For NULL-flavor `match_chunk` this is the documented
    /// "arbitrary, stable within one run" pick.
    pub fn first(&self) -> Option<ChunkRef> {
        match self {
            ChunkIndex::Auto(map) => map.values().next().cloned(),
            _ => None,
        }
    }

    /// Highest-id chunk; the "current" chunk NULL/RANGE registrations fill.
    pub fn highest(&self) -> Option<ChunkRef> {
        match self {
            ChunkIndex::Auto(map) => map.values().next_back().cloned(),
            _ => None,
        }
    }

    /// The next chunk in id order after `id`, for iteration.
    pub fn next_after(&self, id: u64) -> Option<ChunkRef> {
        match self {
            ChunkIndex::Auto(map) => map
                .range((Bound::Excluded(id), Bound::Unbounded))
                .next()
                .map(|(_, chunk)| chunk.clone()),
            _ => None,
        }
    }

    /// Insert a chunk under its key, initializing the index variant on first
    /// use. Mixing key kinds within one shard is a programming error.
    pub fn insert(&mut self, chunk: ChunkRef) {
        let key = chunk.borrow().chunk_key.clone();
        match key {
            ChunkKey::Ident(bytes) => {
                if let ChunkIndex::Unset = self {
                    *self = ChunkIndex::Ident(HashMap::new());
                }
                let ChunkIndex::Ident(map) = self else {
                    panic!("ident chunk inserted into non-ident index");
                };
                map.insert(bytes, chunk);
            }
            ChunkKey::Auto(id) | ChunkKey::Range { id, .. } => {
                if let ChunkIndex::Unset = self {
                    *self = ChunkIndex::Auto(BTreeMap::new());
                }
                let ChunkIndex::Auto(map) = self else {
                    panic!("auto chunk inserted into non-auto index");
                };
                map.insert(id, chunk);
            }
        }
    }

    pub fn remove(&mut self, key: &ChunkKey) -> Option<ChunkRef> {
        match (self, key) {
            (ChunkIndex::Ident(map), ChunkKey::Ident(bytes)) => map.remove(bytes),
            (ChunkIndex::Auto(map), ChunkKey::Auto(id))
            | (ChunkIndex::Auto(map), ChunkKey::Range { id, .. }) => map.remove(id),
            _ => None,
        }
    }

    /// Snapshot of all chunks, in id order for NULL/RANGE.
    pub fn snapshot(&self) -> Vec<ChunkRef> {
        match self {
            ChunkIndex::Unset => Vec::new(),
            ChunkIndex::Ident(map) => map.values().cloned().collect(),
            ChunkIndex::Auto(map) => map.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::RecordFlags;
    use std::rc::Weak;

    fn record(member: u64, path: &str, role: RecordRole) -> MemberRecord {
        let flags = match role {
            RecordRole::Publisher => RecordFlags::publisher(),
            RecordRole::Subscriber => RecordFlags::subscriber(),
        };
        MemberRecord::new(member, path, flags)
    }

    #[test]
    fn test_insert_and_counts() {
        let mut maps = RecordMaps::default();
        maps.insert(record(1, "path/a", RecordRole::Subscriber));
        maps.insert(record(2, "path/b", RecordRole::Subscriber));
        maps.insert(record(3, "path/c", RecordRole::Publisher));

        assert_eq!(maps.subscriber_count(), 2);
        assert_eq!(maps.publisher_count(), 1);
        assert_eq!(maps.total(), 3);
        assert_eq!(maps.get("path/a", RecordRole::Subscriber).unwrap().member, 1);
        assert!(maps.get("path/a", RecordRole::Publisher).is_none());
    }

    #[test]
    fn test_duplicate_registration_is_additive() {
        let mut maps = RecordMaps::default();
        maps.insert(record(1, "path/a", RecordRole::Subscriber));
        maps.insert(record(2, "path/a", RecordRole::Subscriber));
        assert_eq!(maps.subscriber_count(), 2);

        // Removing peels one record at a time
        assert!(maps.remove("path/a", RecordRole::Subscriber).is_some());
        assert_eq!(maps.subscriber_count(), 1);
        assert!(maps.remove("path/a", RecordRole::Subscriber).is_some());
        assert_eq!(maps.subscriber_count(), 0);
        assert!(maps.remove("path/a", RecordRole::Subscriber).is_none());
    }

    #[test]
    fn test_promote_moves_between_maps() {
        let mut maps = RecordMaps::default();
        maps.insert(record(1, "path/a", RecordRole::Subscriber));

        let promoted = maps.promote("path/a").unwrap();
        assert_eq!(promoted.flags.role, RecordRole::Publisher);
        assert_eq!(maps.publisher_count(), 1);
        assert_eq!(maps.subscriber_count(), 0);
        assert!(maps.get("path/a", RecordRole::Subscriber).is_none());
        assert!(maps.get("path/a", RecordRole::Publisher).is_some());

        // Nothing left to promote
        assert!(maps.promote("path/a").is_none());
    }

    #[test]
    fn test_retain_fixes_counters() {
        let mut maps = RecordMaps::default();
        maps.insert(record(1, "path/a", RecordRole::Subscriber));
        maps.insert(record(2, "path/b", RecordRole::Subscriber));
        maps.insert(record(1, "path/c", RecordRole::Publisher));

        maps.retain(|r| r.member != 1);
        assert_eq!(maps.subscriber_count(), 1);
        assert_eq!(maps.publisher_count(), 0);
        assert!(maps.get("path/b", RecordRole::Subscriber).is_some());
    }

    #[test]
    fn test_chunk_index_auto_order() {
        let mut index = ChunkIndex::default();
        for id in [2u64, 0, 1] {
            index.insert(Chunk::new(ChunkKey::Auto(id), Weak::new(), RecordKind::Member));
        }

        assert_eq!(index.len(), 3);
        assert_eq!(index.first().unwrap().borrow().chunk_key, ChunkKey::Auto(0));
        assert_eq!(index.highest().unwrap().borrow().chunk_key, ChunkKey::Auto(2));
        assert_eq!(
            index.next_after(0).unwrap().borrow().chunk_key,
            ChunkKey::Auto(1)
        );
        assert!(index.next_after(2).is_none());
    }

    #[test]
    fn test_chunk_index_ident_lookup() {
        let mut index = ChunkIndex::default();
        index.insert(Chunk::new(
            ChunkKey::Ident(vec![0, 7]),
            Weak::new(),
            RecordKind::Member,
        ));

        assert!(index.get_ident(&[0, 7]).is_some());
        assert!(index.get_ident(&[0, 8]).is_none());
        assert!(index.first().is_none());

        let removed = index.remove(&ChunkKey::Ident(vec![0, 7]));
        assert!(removed.is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn test_range_key_contains() {
        let key = ChunkKey::Range {
            id: 0,
            start: -10,
            end: 10,
        };
        assert!(key.contains(-10));
        assert!(key.contains(0));
        assert!(key.contains(10));
        assert!(!key.contains(11));
        assert!(!ChunkKey::Auto(0).contains(0));
    }
}
