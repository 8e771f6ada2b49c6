//! AuditSink (C9) — a narrow, synchronous hook for lifecycle events.
//!
//! `spec.md` §4.9: called synchronously from within the engine's
//! serialization point for every admit/lease/ack/nack/expire/gc, but
//! always *after* the internal mutex has been released (long-running
//! out-of-process work must not happen inside the critical section, per
//! `spec.md` §5). Failures are logged and counted, never propagated.

use crate::clock::Millis;
use crate::item::{ItemId, LeaseId};

/// One lifecycle event emitted to the audit sink.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    /// An item was admitted.
    Admitted {
        /// The admitted item's id.
        id: ItemId,
        /// Its clinical base priority.
        base_priority: i64,
        /// Engine time of admission.
        at: Millis,
    },
    /// An item was leased to a worker.
    Leased {
        /// The leased item's id.
        id: ItemId,
        /// The lease id granted.
        lease_id: LeaseId,
        /// The worker the lease was granted to.
        worker_id: String,
        /// Engine time of the lease.
        at: Millis,
    },
    /// A lease was acknowledged (success).
    Acked {
        /// The completed item's id.
        id: ItemId,
        /// The lease id that was acknowledged.
        lease_id: LeaseId,
        /// Engine time of completion.
        at: Millis,
    },
    /// A lease was negatively acknowledged.
    Nacked {
        /// The item's id.
        id: ItemId,
        /// The lease id that was nacked.
        lease_id: LeaseId,
        /// Whether the item was requeued (`true`) or failed (`false`).
        requeued: bool,
        /// Caller-supplied reason.
        reason: String,
        /// Engine time of the nack.
        at: Millis,
    },
    /// A lease expired and was reclaimed by the reaper.
    LeaseExpired {
        /// The item's id.
        id: ItemId,
        /// The lease id that expired.
        lease_id: LeaseId,
        /// Engine time of reclamation.
        at: Millis,
    },
    /// Terminal items were removed by garbage collection.
    GarbageCollected {
        /// Number of items removed.
        count: usize,
        /// Engine time of collection.
        at: Millis,
    },
}

/// Narrow hook for emitting lifecycle events to an external audit system.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Emits one lifecycle event. Must not block for long; implementations
    /// that need to do out-of-process I/O should hand the event to their
    /// own buffered task.
    fn emit(&self, event: AuditEvent);
}

/// Default sink: logs every event as a structured `tracing` record.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        match event {
            AuditEvent::Admitted {
                id,
                base_priority,
                at,
            } => {
                tracing::info!(item_id = %id, base_priority, at, "triage item admitted")
            }
            AuditEvent::Leased {
                id,
                lease_id,
                worker_id,
                at,
            } => {
                tracing::info!(item_id = %id, lease_id = %lease_id, worker_id = %worker_id, at, "triage item leased")
            }
            AuditEvent::Acked { id, lease_id, at } => {
                tracing::info!(item_id = %id, lease_id = %lease_id, at, "triage item acked")
            }
            AuditEvent::Nacked {
                id,
                lease_id,
                requeued,
                reason,
                at,
            } => {
                tracing::info!(item_id = %id, lease_id = %lease_id, requeued, reason = %reason, at, "triage item nacked")
            }
            AuditEvent::LeaseExpired { id, lease_id, at } => {
                tracing::warn!(item_id = %id, lease_id = %lease_id, at, "triage lease expired")
            }
            AuditEvent::GarbageCollected { count, at } => {
                tracing::info!(count, at, "triage items garbage collected")
            }
        }
    }
}

/// Sink that discards every event; useful in tests that don't care about
/// the audit trail.
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}
