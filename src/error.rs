//! Closed error enumeration for the triage engine's public boundary.
//!
//! Every public operation returns either a value or exactly one
//! [`ErrorKind`]. No exception is used for control flow across the
//! boundary, and library code never wraps these in `anyhow` — callers get
//! a stable, matchable set of variants.

use thiserror::Error;

/// Result type for all public engine operations.
pub type EngineResult<T> = Result<T, ErrorKind>;

/// Closed set of error conditions a `TriageEngine` operation can return.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// `Admit` called with an id that already exists in the item store.
    #[error("duplicate item id: {id}")]
    DuplicateId {
        /// The id that was already present.
        id: String,
    },

    /// An operation referenced an id that has never been admitted.
    #[error("unknown item id: {id}")]
    UnknownId {
        /// The id that could not be found.
        id: String,
    },

    /// `base_priority` (or a `priority_override`) is not in the engine's
    /// closed priority set.
    #[error("invalid priority: {priority}")]
    InvalidPriority {
        /// The rejected priority value.
        priority: i64,
    },

    /// Store size is already at `max_items`.
    #[error("capacity exceeded: max_items={max_items}")]
    CapacityExceeded {
        /// The configured ceiling that was hit.
        max_items: usize,
    },

    /// A lease id does not correspond to any tracked lease.
    #[error("unknown lease id: {lease_id}")]
    UnknownLease {
        /// The lease id that could not be found.
        lease_id: String,
    },

    /// The referenced lease existed but has already expired and been
    /// reclaimed by the reaper.
    #[error("lease expired: {lease_id}")]
    LeaseExpired {
        /// The lease id that expired.
        lease_id: String,
    },

    /// The referenced item is already in a terminal state.
    #[error("item already terminal: {id}")]
    AlreadyTerminal {
        /// The item id.
        id: String,
    },

    /// The engine has been shut down and refuses new work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// An argument failed validation (bad TTL, escalating priority
    /// override, zero/negative aging step, etc).
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A blocking operation's deadline elapsed before it could complete.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}
