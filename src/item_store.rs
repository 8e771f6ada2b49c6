//! ItemStore (C3) — the sole source of truth for item content.
//!
//! The `PriorityIndex` stores only ids and numeric keys; every payload and
//! lifecycle field lives here. Lives inside the single mutex-guarded
//! `EngineState` (see `engine.rs`), so its own methods don't need internal
//! synchronization.

use std::collections::HashMap;

use crate::item::{ItemId, TriageItem};

/// Mapping from item id to its full record.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: HashMap<ItemId, TriageItem>,
}

impl ItemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the record for `item.id`.
    pub fn put(&mut self, item: TriageItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// Returns a reference to the record for `id`, if present.
    pub fn get(&self, id: &str) -> Option<&TriageItem> {
        self.items.get(id)
    }

    /// Returns a mutable reference to the record for `id`, if present.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut TriageItem> {
        self.items.get_mut(id)
    }

    /// Removes and returns the record for `id`. Garbage collection only —
    /// `spec.md` I1 forbids silent removal elsewhere.
    pub fn remove(&mut self, id: &str) -> Option<TriageItem> {
        self.items.remove(id)
    }

    /// Whether `id` has ever been admitted and not yet GC'd.
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Total number of records (all lifecycle states) currently stored.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A snapshot iterator over all records, used by `QueryService` and by
    /// `PersistenceSnapshot::save`.
    pub fn iter(&self) -> impl Iterator<Item = &TriageItem> {
        self.items.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{LifecycleState, Payload};

    fn sample(id: &str) -> TriageItem {
        TriageItem {
            id: id.to_string(),
            base_priority: 10,
            admitted_at: 0,
            admission_sequence: 0,
            scheduling_base: 10,
            payload: Payload::default(),
            lifecycle_state: LifecycleState::Pending,
            lease: None,
            retries: 0,
            history: Vec::new(),
            terminal_at: None,
        }
    }

    #[test]
    fn put_get_remove_round_trip() {
        let mut store = ItemStore::new();
        store.put(sample("a"));
        assert!(store.contains("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().id, "a");
        let removed = store.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(!store.contains("a"));
        assert!(store.is_empty());
    }
}
