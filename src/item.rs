//! Data model (`spec.md` §3): `TriageItem` and its lifecycle.

use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// Globally unique id assigned by the caller at admission.
pub type ItemId = String;

/// Id of an active lease, assigned by the engine.
pub type LeaseId = String;

/// Strictly increasing sequence number assigned at admission; the
/// tie-breaker for equal effective priority.
pub type AdmissionSequence = u64;

/// Lifecycle state of a `TriageItem`. `Completed` and `Failed` are
/// terminal: `spec.md` I5 forbids any transition out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Admitted, in the priority index, awaiting a lease.
    Pending,
    /// Held by exactly one worker under an active lease.
    Leased,
    /// Terminal: successfully processed.
    Completed,
    /// Terminal: processing failed without requeue (or retries exhausted).
    Failed,
}

impl LifecycleState {
    /// Terminal states (`Completed`, `Failed`) never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }
}

/// Opaque domain payload. The engine never inspects it except for the
/// explicitly enumerated filter keys (`spec.md` §9's re-architecture
/// guidance: one opaque payload type, no runtime reflection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payload {
    /// Assigned clinician/worker pool key, used as a query filter.
    pub clinician_id: Option<String>,
    /// Patient/provider language, used as a query filter.
    pub language: Option<String>,
    /// Cultural context string, stored and returned verbatim; adaptation
    /// is explicitly an external concern (`spec.md` §9).
    pub cultural_context: Option<String>,
    /// Department/service-line key, used as a query filter.
    pub department: Option<String>,
    /// Everything else the engine never looks at: patient id, symptom
    /// list, urgency reason, arbitrary tags.
    pub fields: serde_json::Value,
}

/// An active lease over an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Unique id of this lease.
    pub lease_id: LeaseId,
    /// Id of the worker holding the lease.
    pub worker_id: String,
    /// Time the lease was granted.
    pub leased_at: Millis,
    /// Time after which the lease is eligible for reclamation.
    pub expires_at: Millis,
}

/// One append-only history entry recorded by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Engine time the event occurred.
    pub timestamp: Millis,
    /// Short event name (`admitted`, `leased`, `acked`, `nacked`,
    /// `lease_expired`, ...).
    pub event: String,
    /// Free-form human-readable detail.
    pub detail: String,
}

/// A single triage item: immutable admission fields plus mutable
/// lifecycle fields, exactly `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageItem {
    /// Caller-assigned, globally unique id.
    pub id: ItemId,
    /// Immutable clinical urgency class.
    pub base_priority: i64,
    /// Engine time this item was admitted.
    pub admitted_at: Millis,
    /// Sequence number assigned at admission.
    pub admission_sequence: AdmissionSequence,
    /// The priority aging is currently computed from: `base_priority` at
    /// admission, overwritten by a `priority_override` on each successful
    /// `Nack(requeue=true)`. Kept distinct from `base_priority` so the
    /// clinical classification stays immutable while still letting a
    /// capped override lower an item's scheduling floor for its next
    /// pending interval (`spec.md` §4.5, §9).
    pub scheduling_base: i64,
    /// Opaque domain payload, immutable after admission.
    pub payload: Payload,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Present iff `lifecycle_state == Leased`.
    pub lease: Option<Lease>,
    /// Number of `Nack(requeue=true)` transitions so far.
    pub retries: u32,
    /// Append-only event history.
    pub history: Vec<HistoryEntry>,
    /// Set when entering `Completed` or `Failed`.
    pub terminal_at: Option<Millis>,
}

impl TriageItem {
    pub(crate) fn push_history(&mut self, now: Millis, event: &str, detail: impl Into<String>) {
        self.history.push(HistoryEntry {
            timestamp: now,
            event: event.to_string(),
            detail: detail.into(),
        });
    }
}
