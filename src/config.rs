//! Engine configuration (C11, `spec.md` §6's configuration table).
//!
//! Validated once at construction: an engine can never exist with an
//! inconsistent configuration, matching the teacher's fail-fast-at-
//! construction style.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::aging::AgingPolicy;
use crate::priority::default_priority_set;

/// Configuration error, distinct from the runtime `ErrorKind` set — these
/// can only occur while building an `EngineConfig`/`TriageEngine`, never
/// from a public operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_items` must be at least 1.
    #[error("max_items must be at least 1")]
    MaxItemsZero,
    /// `max_lease_ttl` must be positive.
    #[error("max_lease_ttl must be positive")]
    MaxLeaseTtlZero,
    /// `default_lease_ttl` must be positive and no greater than `max_lease_ttl`.
    #[error("default_lease_ttl must be in (0, max_lease_ttl]")]
    DefaultLeaseTtlOutOfRange,
    /// `priority_set` must be non-empty.
    #[error("priority_set must not be empty")]
    EmptyPrioritySet,
    /// `aging.ceiling` must be one of `priority_set`'s values or greater
    /// than all of them — otherwise aging could never reach it.
    #[error("aging.ceiling must be >= the highest value in priority_set")]
    CeilingBelowPrioritySet,
    /// Invalid aging step/bump (delegated to `AgingPolicy::new`).
    #[error("invalid aging policy: {0}")]
    InvalidAging(String),
}

/// Typed, validated engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on total records (`Pending` + `Leased` + terminal not
    /// yet GC'd).
    pub max_items: usize,
    /// Upper bound for any single lease TTL.
    pub max_lease_ttl: Duration,
    /// TTL used when a caller requests the default.
    pub default_lease_ttl: Duration,
    /// `Nack(requeue=true)` beyond this count transitions to `Failed`.
    pub retry_cap: u32,
    /// Closed set of accepted base priorities.
    pub priority_set: BTreeSet<i64>,
    /// Background aging tick period.
    pub aging_interval: Duration,
    /// Default argument for periodic `GarbageCollect`.
    pub gc_terminal_after: Duration,
    aging_policy: AgingPolicy,
}

impl EngineConfig {
    /// Starts a builder seeded with the documented defaults: `max_items =
    /// 10_000`, `max_lease_ttl = 5m`, `default_lease_ttl = 30s`,
    /// `retry_cap = 5`, `aging.step = 5m`, `aging.bump = 5`,
    /// `aging.ceiling = URGENT`, `aging_interval = 30s`,
    /// `gc_terminal_after = 24h`, `priority_set = {LOW, MEDIUM, HIGH,
    /// URGENT}`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// The validated aging policy derived from `aging.step`/`bump`/`ceiling`.
    pub fn aging_policy(&self) -> &AgingPolicy {
        &self.aging_policy
    }
}

/// Builder for [`EngineConfig`], validated on [`EngineConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    max_items: usize,
    max_lease_ttl: Duration,
    default_lease_ttl: Duration,
    retry_cap: u32,
    priority_set: BTreeSet<i64>,
    aging_step: Duration,
    aging_bump: i64,
    aging_ceiling: i64,
    aging_interval: Duration,
    gc_terminal_after: Duration,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            max_lease_ttl: Duration::from_secs(5 * 60),
            default_lease_ttl: Duration::from_secs(30),
            retry_cap: 5,
            priority_set: default_priority_set(),
            aging_step: Duration::from_secs(5 * 60),
            aging_bump: 5,
            aging_ceiling: crate::priority::URGENT,
            aging_interval: Duration::from_secs(30),
            gc_terminal_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfigBuilder {
    /// Sets `max_items`.
    pub fn max_items(mut self, value: usize) -> Self {
        self.max_items = value;
        self
    }

    /// Sets `max_lease_ttl`.
    pub fn max_lease_ttl(mut self, value: Duration) -> Self {
        self.max_lease_ttl = value;
        self
    }

    /// Sets `default_lease_ttl`.
    pub fn default_lease_ttl(mut self, value: Duration) -> Self {
        self.default_lease_ttl = value;
        self
    }

    /// Sets `retry_cap`.
    pub fn retry_cap(mut self, value: u32) -> Self {
        self.retry_cap = value;
        self
    }

    /// Sets the closed `priority_set`.
    pub fn priority_set(mut self, value: BTreeSet<i64>) -> Self {
        self.priority_set = value;
        self
    }

    /// Sets `aging.step`/`aging.bump`/`aging.ceiling`.
    pub fn aging(mut self, step: Duration, bump: i64, ceiling: i64) -> Self {
        self.aging_step = step;
        self.aging_bump = bump;
        self.aging_ceiling = ceiling;
        self
    }

    /// Sets `aging_interval`.
    pub fn aging_interval(mut self, value: Duration) -> Self {
        self.aging_interval = value;
        self
    }

    /// Sets `gc_terminal_after`.
    pub fn gc_terminal_after(mut self, value: Duration) -> Self {
        self.gc_terminal_after = value;
        self
    }

    /// Validates and builds the final [`EngineConfig`].
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::MaxItemsZero);
        }
        if self.max_lease_ttl.is_zero() {
            return Err(ConfigError::MaxLeaseTtlZero);
        }
        if self.default_lease_ttl.is_zero() || self.default_lease_ttl > self.max_lease_ttl {
            return Err(ConfigError::DefaultLeaseTtlOutOfRange);
        }
        if self.priority_set.is_empty() {
            return Err(ConfigError::EmptyPrioritySet);
        }
        let highest = *self
            .priority_set
            .iter()
            .next_back()
            .expect("priority_set validated non-empty above");
        if self.aging_ceiling < highest {
            return Err(ConfigError::CeilingBelowPrioritySet);
        }
        let aging_policy = AgingPolicy::new(self.aging_step, self.aging_bump, self.aging_ceiling)
            .map_err(|e| ConfigError::InvalidAging(e.to_string()))?;

        Ok(EngineConfig {
            max_items: self.max_items,
            max_lease_ttl: self.max_lease_ttl,
            default_lease_ttl: self.default_lease_ttl,
            retry_cap: self.retry_cap,
            priority_set: self.priority_set,
            aging_interval: self.aging_interval,
            gc_terminal_after: self.gc_terminal_after,
            aging_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_successfully() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config.max_items, 10_000);
        assert_eq!(config.retry_cap, 5);
    }

    #[test]
    fn rejects_zero_max_items() {
        let err = EngineConfig::builder().max_items(0).build().unwrap_err();
        assert_eq!(err, ConfigError::MaxItemsZero);
    }

    #[test]
    fn rejects_default_ttl_above_max_ttl() {
        let err = EngineConfig::builder()
            .max_lease_ttl(Duration::from_secs(10))
            .default_lease_ttl(Duration::from_secs(20))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::DefaultLeaseTtlOutOfRange);
    }

    #[test]
    fn rejects_ceiling_below_priority_set() {
        let err = EngineConfig::builder()
            .aging(Duration::from_secs(60), 5, 1)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::CeilingBelowPrioritySet);
    }
}
