//! The closed set of clinical base priorities (`spec.md` §3).
//!
//! `base_priority` is one canonical numeric type internally; the
//! string/numeric conversion the source mixed is strictly a boundary
//! concern and does not appear here (`spec.md` §9).

use std::collections::BTreeSet;

/// Lowest clinical urgency class.
pub const LOW: i64 = 10;
/// Routine but non-trivial urgency.
pub const MEDIUM: i64 = 25;
/// Elevated urgency, should be seen soon.
pub const HIGH: i64 = 50;
/// Highest urgency; also the default aging ceiling.
pub const URGENT: i64 = 75;

/// Default closed set of accepted base priorities.
pub fn default_priority_set() -> BTreeSet<i64> {
    BTreeSet::from([LOW, MEDIUM, HIGH, URGENT])
}
