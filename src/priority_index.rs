//! PriorityIndex (C2) — ordered multiset of admitted (`Pending`) item ids.
//!
//! Keyed by `(effective_priority, -admission_sequence)`: highest priority
//! first, ties broken by earliest admission. Implemented as a `BinaryHeap`
//! plus a secondary map of each id's *current* authoritative key, using the
//! lazy-deletion/tombstone scheme `spec.md` §4.2 explicitly allows —
//! `remove` and re-insertion (for aging) just update the secondary map;
//! stale heap entries are skipped when popped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::item::{AdmissionSequence, ItemId};

/// The ordering key for an item while it sits in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapKey {
    /// Effective priority at the time this key was computed.
    pub effective_priority: i64,
    /// Strictly increasing tie-breaker assigned at admission.
    pub sequence: AdmissionSequence,
}

#[derive(Debug, Clone)]
struct HeapEntry {
    id: ItemId,
    key: HeapKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority pops first, and among
        // equal priorities the *smaller* sequence number must pop first,
        // so we reverse the sequence comparison.
        self.key
            .effective_priority
            .cmp(&other.key.effective_priority)
            .then_with(|| other.key.sequence.cmp(&self.key.sequence))
    }
}

/// Max-ordered index of `Pending` item ids.
#[derive(Debug, Default)]
pub struct PriorityIndex {
    heap: BinaryHeap<HeapEntry>,
    /// The authoritative key for every id currently logically in the
    /// index. A heap entry is stale (tombstoned) iff this map's entry for
    /// its id doesn't match it byte-for-byte.
    current: HashMap<ItemId, HeapKey>,
}

impl PriorityIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` with `key`, replacing any prior key for the same id
    /// (used both for first admission and for aging re-insertion).
    pub fn insert(&mut self, id: ItemId, key: HeapKey) {
        self.current.insert(id.clone(), key);
        self.heap.push(HeapEntry { id, key });
    }

    /// Removes `id` from the index. O(1); the matching heap entry becomes
    /// a tombstone and is dropped lazily on the next `pop_max`/`peek`.
    pub fn remove(&mut self, id: &ItemId) {
        self.current.remove(id);
    }

    /// Pops and returns the id with the strictly highest key, or `None` if
    /// the index is logically empty.
    pub fn pop_max(&mut self) -> Option<ItemId> {
        while let Some(top) = self.heap.pop() {
            if self.current.get(&top.id) == Some(&top.key) {
                self.current.remove(&top.id);
                return Some(top.id);
            }
            // Stale/tombstoned entry — keep draining.
        }
        None
    }

    /// Returns the id with the strictly highest key without removing it.
    pub fn peek(&mut self) -> Option<ItemId> {
        loop {
            let top = self.heap.peek()?;
            if self.current.get(&top.id) == Some(&top.key) {
                return Some(top.id.clone());
            }
            self.heap.pop();
        }
    }

    /// The key currently associated with `id`, if it is in the index.
    pub fn current_key(&self, id: &ItemId) -> Option<HeapKey> {
        self.current.get(id).copied()
    }

    /// Logical number of items in the index (tombstones excluded).
    pub fn size(&self) -> usize {
        self.current.len()
    }

    /// Iterator over all ids currently in the index, in no particular
    /// order. Used by aging and by queries that need a full pending scan.
    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.current.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: i64, sequence: AdmissionSequence) -> HeapKey {
        HeapKey {
            effective_priority: priority,
            sequence,
        }
    }

    #[test]
    fn pop_max_orders_by_priority_then_sequence() {
        let mut index = PriorityIndex::new();
        index.insert("a".into(), key(10, 0));
        index.insert("b".into(), key(75, 1));
        index.insert("c".into(), key(50, 2));
        index.insert("d".into(), key(10, 3));

        assert_eq!(index.pop_max().as_deref(), Some("b"));
        assert_eq!(index.pop_max().as_deref(), Some("c"));
        assert_eq!(index.pop_max().as_deref(), Some("a"));
        assert_eq!(index.pop_max().as_deref(), Some("d"));
        assert_eq!(index.pop_max(), None);
    }

    #[test]
    fn remove_then_pop_skips_tombstone() {
        let mut index = PriorityIndex::new();
        index.insert("a".into(), key(10, 0));
        index.insert("b".into(), key(10, 1));
        index.remove(&"a".to_string());
        assert_eq!(index.size(), 1);
        assert_eq!(index.pop_max().as_deref(), Some("b"));
        assert_eq!(index.pop_max(), None);
    }

    #[test]
    fn reinsert_updates_ordering_and_drops_old_entry() {
        let mut index = PriorityIndex::new();
        index.insert("a".into(), key(10, 0));
        index.insert("b".into(), key(20, 1));
        // Age "a" up past "b".
        index.insert("a".into(), key(30, 0));

        assert_eq!(index.size(), 2);
        assert_eq!(index.pop_max().as_deref(), Some("a"));
        assert_eq!(index.pop_max().as_deref(), Some("b"));
        assert_eq!(index.pop_max(), None);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut index = PriorityIndex::new();
        index.insert("a".into(), key(10, 0));
        assert_eq!(index.peek().as_deref(), Some("a"));
        assert_eq!(index.size(), 1);
        assert_eq!(index.pop_max().as_deref(), Some("a"));
    }
}
