//! LeaseTracker (C6) — outstanding leases indexed by id and by expiry.
//!
//! Lives inside the single mutex-guarded `EngineState`. Indexed twice so
//! the reaper can always find the next expiry in O(log n) via the
//! `BTreeMap`, while `Ack`/`Nack`/`ExtendLease` look a lease up by id in
//! O(1). Any resolution of a lease removes both entries atomically (under
//! the same mutex the reaper itself locks), which is what makes the
//! reaper idempotent with respect to concurrently-resolved leases.

use std::collections::{BTreeMap, HashMap};

use crate::clock::Millis;
use crate::item::{ItemId, LeaseId};

#[derive(Debug, Clone)]
struct LeaseRecord {
    item_id: ItemId,
    expires_at: Millis,
}

/// Tracks outstanding leases with deadlines.
#[derive(Debug, Default)]
pub struct LeaseTracker {
    by_id: HashMap<LeaseId, LeaseRecord>,
    by_expiry: BTreeMap<(Millis, LeaseId), ()>,
}

impl LeaseTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new lease.
    pub fn insert(&mut self, lease_id: LeaseId, item_id: ItemId, expires_at: Millis) {
        self.by_expiry.insert((expires_at, lease_id.clone()), ());
        self.by_id.insert(lease_id, LeaseRecord { item_id, expires_at });
    }

    /// Looks up the item id a lease refers to, if the lease is still
    /// outstanding.
    pub fn item_for(&self, lease_id: &str) -> Option<&ItemId> {
        self.by_id.get(lease_id).map(|r| &r.item_id)
    }

    /// Removes a lease (on `Ack`, `Nack`, or reaper expiry). Returns the
    /// item id it referred to, if it was still present.
    pub fn remove(&mut self, lease_id: &str) -> Option<ItemId> {
        let record = self.by_id.remove(lease_id)?;
        self.by_expiry.remove(&(record.expires_at, lease_id.to_string()));
        Some(record.item_id)
    }

    /// Moves a lease's expiry forward (`ExtendLease`).
    pub fn extend(&mut self, lease_id: &str, new_expires_at: Millis) -> bool {
        let Some(record) = self.by_id.get_mut(lease_id) else {
            return false;
        };
        let old_expires_at = record.expires_at;
        record.expires_at = new_expires_at;
        self.by_expiry.remove(&(old_expires_at, lease_id.to_string()));
        self.by_expiry.insert((new_expires_at, lease_id.to_string()), ());
        true
    }

    /// The earliest expiry currently tracked, if any.
    pub fn next_expiry(&self) -> Option<Millis> {
        self.by_expiry.keys().next().map(|(t, _)| *t)
    }

    /// Drains and returns every lease (`lease_id`, `item_id`) whose expiry
    /// is `<= now`, removing them from the tracker.
    pub fn drain_expired(&mut self, now: Millis) -> Vec<(LeaseId, ItemId)> {
        let mut expired = Vec::new();
        let mut remaining = BTreeMap::new();
        for (key, ()) in std::mem::take(&mut self.by_expiry) {
            if key.0 <= now {
                expired.push(key);
            } else {
                remaining.insert(key, ());
            }
        }
        self.by_expiry = remaining;

        let mut result = Vec::with_capacity(expired.len());
        for (_, lease_id) in expired {
            if let Some(record) = self.by_id.remove(&lease_id) {
                result.push((lease_id, record.item_id));
            }
        }
        result
    }

    /// Number of outstanding leases.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no leases are outstanding.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut tracker = LeaseTracker::new();
        tracker.insert("l1".into(), "item-1".into(), 1_000);
        assert_eq!(tracker.item_for("l1"), Some(&"item-1".to_string()));
        assert_eq!(tracker.next_expiry(), Some(1_000));
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut tracker = LeaseTracker::new();
        tracker.insert("l1".into(), "item-1".into(), 1_000);
        assert_eq!(tracker.remove("l1"), Some("item-1".to_string()));
        assert!(tracker.is_empty());
        assert_eq!(tracker.next_expiry(), None);
    }

    #[test]
    fn extend_moves_expiry() {
        let mut tracker = LeaseTracker::new();
        tracker.insert("l1".into(), "item-1".into(), 1_000);
        assert!(tracker.extend("l1", 5_000));
        assert_eq!(tracker.next_expiry(), Some(5_000));
    }

    #[test]
    fn drain_expired_only_returns_due_leases() {
        let mut tracker = LeaseTracker::new();
        tracker.insert("l1".into(), "item-1".into(), 1_000);
        tracker.insert("l2".into(), "item-2".into(), 5_000);

        let expired = tracker.drain_expired(2_000);
        assert_eq!(expired, vec![("l1".to_string(), "item-1".to_string())]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.next_expiry(), Some(5_000));
    }

    #[test]
    fn resolved_lease_is_never_seen_by_drain() {
        let mut tracker = LeaseTracker::new();
        tracker.insert("l1".into(), "item-1".into(), 1_000);
        tracker.remove("l1");
        assert!(tracker.drain_expired(10_000).is_empty());
    }
}
