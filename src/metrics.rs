//! MetricsRegistry (C7) — a live view of engine events.
//!
//! Kept as an atomics/`DashMap`-based structure so [`MetricsRegistry::snapshot`]
//! can return a consistent structured value synchronously, and mirrored
//! through the `metrics` crate's facade macros on every update so a host
//! process can still attach a Prometheus/OTLP exporter without this crate
//! depending on one directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::item::LifecycleState;

/// Running min/sum/max/count summary for a latency series, in
/// milliseconds. A full bucketed histogram is out of scope for an
/// in-process kernel; these summary statistics are what `metrics_snapshot`
/// exposes to dashboards, with the raw samples also forwarded to the
/// `metrics` facade for anyone running a real histogram exporter.
#[derive(Debug)]
struct LatencySummary {
    count: AtomicU64,
    sum_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Default for LatencySummary {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }
}

impl LatencySummary {
    fn record(&self, sample_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(sample_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(sample_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(sample_ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencyStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum_ms = self.sum_ms.load(Ordering::Relaxed);
        LatencyStats {
            count,
            mean_ms: if count > 0 {
                sum_ms as f64 / count as f64
            } else {
                0.0
            },
            min_ms: if count > 0 {
                self.min_ms.load(Ordering::Relaxed)
            } else {
                0
            },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a [`LatencySummary`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencyStats {
    /// Number of samples recorded.
    pub count: u64,
    /// Mean latency in milliseconds.
    pub mean_ms: f64,
    /// Minimum observed latency in milliseconds.
    pub min_ms: u64,
    /// Maximum observed latency in milliseconds.
    pub max_ms: u64,
}

/// Structured snapshot returned by `metrics_snapshot()`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    /// Total successful `Admit` calls.
    pub admitted_total: u64,
    /// Total `Lease` calls that returned an item.
    pub leased_total: u64,
    /// Total `Ack` calls.
    pub acked_total: u64,
    /// Total `Nack(requeue=true)` calls that returned the item to `Pending`.
    pub nacked_requeued_total: u64,
    /// Total `Nack(requeue=false)` calls, plus requeues that exhausted
    /// `retry_cap`.
    pub nacked_failed_total: u64,
    /// Total leases reclaimed by the reaper after expiry.
    pub lease_expired_total: u64,
    /// Total `Admit` calls rejected with `CapacityExceeded`.
    pub capacity_rejected_total: u64,
    /// Total items removed by `GarbageCollect`.
    pub gc_total: u64,
    /// Admits, by base priority.
    pub admitted_by_priority: HashMap<i64, u64>,
    /// Current `Pending` queue depth, by base priority.
    pub pending_depth_by_priority: HashMap<i64, i64>,
    /// Current number of outstanding leases.
    pub in_flight_leases: i64,
    /// Current item count, by lifecycle state.
    pub store_size_by_state: HashMap<String, i64>,
    /// Admit-to-lease latency summary.
    pub admit_to_lease: LatencyStats,
    /// Lease-to-terminal latency summary.
    pub lease_to_terminal: LatencyStats,
}

/// Live counters, gauges, and histograms derived from engine events.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    admitted_total: AtomicU64,
    leased_total: AtomicU64,
    acked_total: AtomicU64,
    nacked_requeued_total: AtomicU64,
    nacked_failed_total: AtomicU64,
    lease_expired_total: AtomicU64,
    capacity_rejected_total: AtomicU64,
    gc_total: AtomicU64,
    admitted_by_priority: DashMap<i64, AtomicU64>,
    pending_depth_by_priority: DashMap<i64, AtomicI64>,
    in_flight_leases: AtomicI64,
    store_size_by_state: DashMap<&'static str, AtomicI64>,
    admit_to_lease: LatencySummary,
    lease_to_terminal: LatencySummary,
}

fn state_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Pending => "pending",
        LifecycleState::Leased => "leased",
        LifecycleState::Completed => "completed",
        LifecycleState::Failed => "failed",
    }
}

impl MetricsRegistry {
    /// Creates a fresh, zeroed registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_state(&self, state: LifecycleState, delta: i64) {
        self.store_size_by_state
            .entry(state_label(state))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Records a successful admission.
    pub fn on_admit(&self, priority: i64) {
        self.admitted_total.fetch_add(1, Ordering::Relaxed);
        self.admitted_by_priority
            .entry(priority)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.pending_depth_by_priority
            .entry(priority)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.bump_state(LifecycleState::Pending, 1);
        metrics::counter!("triage_admitted_total").increment(1);
        metrics::gauge!("triage_pending_depth", "priority" => priority.to_string()).increment(1.0);
    }

    /// Records a successful admission rejected for capacity.
    pub fn on_capacity_rejected(&self) {
        self.capacity_rejected_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("triage_capacity_rejected_total").increment(1);
    }

    /// Records a `Pending` item being leased. `wait_ms` is the
    /// admit-to-lease latency.
    pub fn on_lease(&self, priority: i64, wait_ms: u64) {
        self.leased_total.fetch_add(1, Ordering::Relaxed);
        self.pending_depth_by_priority
            .entry(priority)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_sub(1, Ordering::Relaxed);
        self.in_flight_leases.fetch_add(1, Ordering::Relaxed);
        self.bump_state(LifecycleState::Pending, -1);
        self.bump_state(LifecycleState::Leased, 1);
        self.admit_to_lease.record(wait_ms);
        metrics::counter!("triage_leased_total").increment(1);
        metrics::histogram!("triage_admit_to_lease_ms", "priority" => priority.to_string())
            .record(wait_ms as f64);
    }

    /// Records an `Ack`. `service_ms` is the lease-to-terminal latency.
    pub fn on_ack(&self, priority: i64, service_ms: u64) {
        self.acked_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight_leases.fetch_sub(1, Ordering::Relaxed);
        self.bump_state(LifecycleState::Leased, -1);
        self.bump_state(LifecycleState::Completed, 1);
        self.lease_to_terminal.record(service_ms);
        metrics::counter!("triage_acked_total").increment(1);
        metrics::histogram!("triage_lease_to_terminal_ms", "priority" => priority.to_string())
            .record(service_ms as f64);
    }

    /// Records a `Nack(requeue=true)` that returned the item to `Pending`.
    pub fn on_nack_requeued(&self, priority: i64) {
        self.nacked_requeued_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight_leases.fetch_sub(1, Ordering::Relaxed);
        self.pending_depth_by_priority
            .entry(priority)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.bump_state(LifecycleState::Leased, -1);
        self.bump_state(LifecycleState::Pending, 1);
        metrics::counter!("triage_nacked_requeued_total").increment(1);
    }

    /// Records a transition to `Failed`, whether via explicit
    /// `Nack(requeue=false)` or retry-cap exhaustion. `service_ms` is the
    /// lease-to-terminal latency.
    pub fn on_nack_failed(&self, service_ms: u64) {
        self.nacked_failed_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight_leases.fetch_sub(1, Ordering::Relaxed);
        self.bump_state(LifecycleState::Leased, -1);
        self.bump_state(LifecycleState::Failed, 1);
        self.lease_to_terminal.record(service_ms);
        metrics::counter!("triage_nacked_failed_total").increment(1);
    }

    /// Records a lease reclaimed by the reaper (returned to `Pending`).
    pub fn on_lease_expired(&self, priority: i64) {
        self.lease_expired_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight_leases.fetch_sub(1, Ordering::Relaxed);
        self.pending_depth_by_priority
            .entry(priority)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.bump_state(LifecycleState::Leased, -1);
        self.bump_state(LifecycleState::Pending, 1);
        metrics::counter!("triage_lease_expired_total").increment(1);
    }

    /// Records `n` terminal items removed by garbage collection.
    pub fn on_gc(&self, n: u64, by_state: &[(LifecycleState, i64)]) {
        self.gc_total.fetch_add(n, Ordering::Relaxed);
        for (state, count) in by_state {
            self.bump_state(*state, -*count);
        }
        metrics::counter!("triage_gc_total").increment(n);
    }

    /// Produces a consistent structured snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted_total: self.admitted_total.load(Ordering::Relaxed),
            leased_total: self.leased_total.load(Ordering::Relaxed),
            acked_total: self.acked_total.load(Ordering::Relaxed),
            nacked_requeued_total: self.nacked_requeued_total.load(Ordering::Relaxed),
            nacked_failed_total: self.nacked_failed_total.load(Ordering::Relaxed),
            lease_expired_total: self.lease_expired_total.load(Ordering::Relaxed),
            capacity_rejected_total: self.capacity_rejected_total.load(Ordering::Relaxed),
            gc_total: self.gc_total.load(Ordering::Relaxed),
            admitted_by_priority: self
                .admitted_by_priority
                .iter()
                .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
                .collect(),
            pending_depth_by_priority: self
                .pending_depth_by_priority
                .iter()
                .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
                .collect(),
            in_flight_leases: self.in_flight_leases.load(Ordering::Relaxed),
            store_size_by_state: self
                .store_size_by_state
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect(),
            admit_to_lease: self.admit_to_lease.snapshot(),
            lease_to_terminal: self.lease_to_terminal.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_then_lease_updates_gauges_and_counters() {
        let metrics = MetricsRegistry::new();
        metrics.on_admit(10);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted_total, 1);
        assert_eq!(snapshot.pending_depth_by_priority.get(&10), Some(&1));

        metrics.on_lease(10, 500);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.leased_total, 1);
        assert_eq!(snapshot.pending_depth_by_priority.get(&10), Some(&0));
        assert_eq!(snapshot.in_flight_leases, 1);
        assert_eq!(snapshot.admit_to_lease.count, 1);
        assert_eq!(snapshot.admit_to_lease.mean_ms, 500.0);
    }

    #[test]
    fn ack_after_lease_clears_in_flight() {
        let metrics = MetricsRegistry::new();
        metrics.on_admit(50);
        metrics.on_lease(50, 10);
        metrics.on_ack(50, 20);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight_leases, 0);
        assert_eq!(snapshot.acked_total, 1);
        assert_eq!(snapshot.store_size_by_state.get("completed"), Some(&1));
    }
}
