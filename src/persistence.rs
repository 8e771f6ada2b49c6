//! PersistenceSnapshot (C10) — optional save/restore of logical state.
//!
//! `spec.md` §4.9/§6: a durable backend is explicitly out of scope; this
//! module only defines the interface and the versioned wire format.
//! `Restore(Save())` must reproduce identical `ItemStore`/`PriorityIndex`
//! state except that every `Leased` item comes back as `Pending`
//! (`spec.md` §6, P7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Millis;
use crate::item::{AdmissionSequence, TriageItem};

/// Current wire-format version. Backwards compatibility is additive-field
/// only, per `spec.md` §6.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Error saving to or loading from a [`SnapshotStore`].
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The backend failed to persist or retrieve bytes.
    #[error("snapshot store error: {0}")]
    Store(String),
    /// The bytes were not a well-formed snapshot.
    #[error("snapshot decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// The snapshot's `version` is newer than this build understands.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),
}

/// Versioned, serializable record of the engine's logical state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Wire-format version.
    pub version: u32,
    /// The clock's `now()` at the time of the snapshot, so a restored
    /// engine with a fresh clock can reason about elapsed aging time.
    pub clock_offset_millis: Millis,
    /// Next admission sequence to allocate after restore.
    pub admission_sequence: AdmissionSequence,
    /// Every item, in any lifecycle state. `Leased` items are persisted as
    /// `Pending` with their lease cleared, per `spec.md` §6.
    pub items: Vec<TriageItem>,
}

impl EngineSnapshot {
    /// Encodes the snapshot as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a snapshot from JSON bytes, rejecting unsupported versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let snapshot: EngineSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }
}

/// External collaborator: a place to put/get snapshot bytes. A durable
/// implementation (file, object store, database) is out of scope for this
/// crate; only the interface is defined here.
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Persists `bytes` as the latest snapshot.
    fn save(&self, bytes: Vec<u8>) -> Result<(), PersistenceError>;
    /// Retrieves the most recently saved snapshot bytes, if any.
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;
}

/// Trivial in-process store, useful for tests and the CLI demo. Not a
/// durable backend — state is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    slot: parking_lot::Mutex<Option<Vec<u8>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        *self.slot.lock() = Some(bytes);
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.slot.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{LifecycleState, Payload};

    fn sample_item() -> TriageItem {
        TriageItem {
            id: "a".to_string(),
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
    fn round_trips_through_bytes() {
        let snapshot = EngineSnapshot {
            version: SNAPSHOT_VERSION,
            clock_offset_millis: 1_234,
            admission_sequence: 7,
            items: vec![sample_item()],
        };
        let bytes = snapshot.to_bytes().unwrap();
        let restored = EngineSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(restored.admission_sequence, 7);
        assert_eq!(restored.items.len(), 1);
    }

    #[test]
    fn rejects_future_version() {
        let snapshot = EngineSnapshot {
            version: SNAPSHOT_VERSION + 1,
            clock_offset_millis: 0,
            admission_sequence: 0,
            items: vec![],
        };
        let bytes = snapshot.to_bytes().unwrap();
        assert!(matches!(
            EngineSnapshot::from_bytes(&bytes),
            Err(PersistenceError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(vec![1, 2, 3]).unwrap();
        assert_eq!(store.load().unwrap(), Some(vec![1, 2, 3]));
    }
}
