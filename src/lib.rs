//! Priority-aware triage engine: an in-process scheduling kernel for
//! clinical triage items, ordered by clinical urgency with fair aging,
//! handed off to workers with at-most-once lease semantics.
//!
//! See `TriageEngine` for the public command surface and `EngineConfig` for
//! the configuration table.

#![deny(clippy::unwrap_used)]

pub mod aging;
pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod item;
mod item_store;
mod lease;
pub mod metrics;
pub mod persistence;
pub mod priority;
mod priority_index;
pub mod query;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use engine::{LeaseGrant, TriageEngine};
pub use error::{EngineResult, ErrorKind};
pub use item::{HistoryEntry, Lease, LifecycleState, Payload, TriageItem};
