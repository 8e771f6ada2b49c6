//! TriageEngine (C5) — orchestrates admit/lease/ack/nack/query against
//! `PriorityIndex` + `ItemStore` + `LeaseTracker` under a single
//! serialization discipline.
//!
//! Implements the **mutex-protected core** variant named in `spec.md` §5: a
//! single `parking_lot::Mutex<EngineState>` guards C2+C3+C6, never held
//! across an `.await`. Blocking `Lease` calls are layered on top with a FIFO
//! ticket queue (`EngineState::{register_waiter, wake_front_waiter}`) plus a
//! per-waiter `tokio::sync::Notify`, so waiters are served in strict
//! arrival order without needing the fully message-passing "serialized
//! core" alternative.

mod state;

pub use state::LeaseGrant;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::audit::{AuditEvent, AuditSink, NullAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineResult, ErrorKind};
use crate::item::{ItemId, Payload, TriageItem};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::persistence::{EngineSnapshot, PersistenceError, SnapshotStore};
use crate::query::{Filter, Page};

use state::EngineState;

struct Inner {
    state: Mutex<EngineState>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    audit: Arc<dyn AuditSink>,
    next_ticket: AtomicU64,
    /// Wakes the reaper early when a lease is inserted or extended with an
    /// expiry sooner than whatever it's currently sleeping toward, so a
    /// short-TTL lease can't get stuck behind an earlier, longer sleep
    /// computed before it existed.
    reaper_wake: Notify,
}

/// The in-process priority-aware triage scheduling kernel.
///
/// Cheap to clone: internally `Arc`-shared, matching the teacher's
/// `WorkflowEngine` handle pattern. Background aging-tick and reaper tasks
/// are spawned once at construction and aborted on `shutdown`.
pub struct TriageEngine {
    inner: Arc<Inner>,
    aging_task: JoinHandle<()>,
    reaper_task: JoinHandle<()>,
}

impl std::fmt::Debug for TriageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageEngine").finish_non_exhaustive()
    }
}

impl TriageEngine {
    /// Builds an engine with the real system clock and default (tracing,
    /// no persistence) collaborators.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_collaborators(config, Arc::new(SystemClock::new()), Arc::new(NullAuditSink))
    }

    /// Builds an engine with explicit `Clock` and `AuditSink` collaborators
    /// — the seam tests use to inject a `FakeClock`.
    pub fn with_collaborators(config: EngineConfig, clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(EngineState::new()),
            config,
            clock,
            metrics: MetricsRegistry::new(),
            audit,
            next_ticket: AtomicU64::new(0),
            reaper_wake: Notify::new(),
        });

        let aging_task = tokio::spawn(aging_tick_loop(inner.clone()));
        let reaper_task = tokio::spawn(reaper_loop(inner.clone()));

        Self {
            inner,
            aging_task,
            reaper_task,
        }
    }

    /// Emits every collected `AuditEvent`. Callers gather events while the
    /// state mutex is held and call this only after releasing it, so a
    /// slow `AuditSink` (out-of-process I/O) never serializes other engine
    /// operations behind the lock (`spec.md` §5).
    fn emit_all(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.inner.audit.emit(event);
        }
    }

    /// Admits a new item. Non-blocking.
    pub fn admit(&self, id: impl Into<String>, base_priority: i64, payload: Payload) -> EngineResult<ItemId> {
        let now = self.inner.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return Err(ErrorKind::ShuttingDown);
            }
            let result = state.admit(&self.inner.config, &self.inner.metrics, id.into(), base_priority, payload, now, &mut events);
            if result.is_ok() {
                state.wake_front_waiter();
            }
            result
        };
        self.emit_all(events);
        result
    }

    /// Leases the highest-priority `Pending` item to `worker_id`.
    ///
    /// `deadline`: `None` blocks until an item is available (or the engine
    /// shuts down); `Some(Duration::ZERO)` polls once and returns `Ok(None)`
    /// immediately if nothing is pending; any other `Some(d)` blocks up to
    /// `d` and returns `DeadlineExceeded` on timeout — this is the concrete
    /// reading of §6's `lease(worker_id, lease_ttl, deadline)` the spec's
    /// prose leaves implicit.
    pub async fn lease(
        &self,
        worker_id: impl Into<String>,
        lease_ttl: Duration,
        deadline: Option<Duration>,
    ) -> EngineResult<Option<LeaseGrant>> {
        let worker_id = worker_id.into();
        if lease_ttl.is_zero() || lease_ttl > self.inner.config.max_lease_ttl {
            return Err(ErrorKind::InvalidArgument {
                reason: format!(
                    "lease_ttl must be in (0, {:?}]",
                    self.inner.config.max_lease_ttl
                ),
            });
        }

        if deadline == Some(Duration::ZERO) {
            // Non-blocking poll: a single immediate attempt, ignoring the
            // FIFO queue entirely since there is nothing to wait on.
            let mut events = Vec::new();
            let result = {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return Err(ErrorKind::ShuttingDown);
                }
                state.try_lease(
                    self.inner.clock.as_ref(),
                    &self.inner.config,
                    &self.inner.metrics,
                    worker_id,
                    lease_ttl,
                    &mut events,
                )
            };
            self.emit_all(events);
            if matches!(result, Ok(Some(_))) {
                self.inner.reaper_wake.notify_one();
            }
            return result;
        }

        let deadline_at = deadline.map(|d| self.inner.clock.now().saturating_add(d.as_millis() as u64));

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
        let notify = Arc::new(Notify::new());

        loop {
            let mut events = Vec::new();
            let attempt = {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    state.remove_waiter(ticket);
                    Some(Err(ErrorKind::ShuttingDown))
                } else if state.is_front_or_empty(ticket) {
                    match state.try_lease(
                        self.inner.clock.as_ref(),
                        &self.inner.config,
                        &self.inner.metrics,
                        worker_id.clone(),
                        lease_ttl,
                        &mut events,
                    ) {
                        Ok(Some(grant)) => {
                            state.remove_waiter(ticket);
                            if state.has_pending() {
                                state.wake_front_waiter();
                            }
                            Some(Ok(grant))
                        }
                        Ok(None) => {
                            state.register_waiter(ticket, notify.clone());
                            None
                        }
                        Err(e) => Some(Err(e)),
                    }
                } else {
                    state.register_waiter(ticket, notify.clone());
                    None
                }
            };
            self.emit_all(events);
            match attempt {
                Some(Ok(grant)) => {
                    self.inner.reaper_wake.notify_one();
                    return Ok(Some(grant));
                }
                Some(Err(e)) => return Err(e),
                None => {}
            }

            match deadline_at {
                None => notify.notified().await,
                Some(deadline_at) => {
                    let now = self.inner.clock.now();
                    if now >= deadline_at {
                        self.inner.state.lock().remove_waiter(ticket);
                        return Err(ErrorKind::DeadlineExceeded);
                    }
                    let remaining = Duration::from_millis(deadline_at - now);
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = self.inner.clock.after(remaining) => {
                            self.inner.state.lock().remove_waiter(ticket);
                            return Err(ErrorKind::DeadlineExceeded);
                        }
                    }
                }
            }
        }
    }

    /// Acknowledges a lease as successfully completed.
    pub fn ack(&self, lease_id: &str, detail: &str) -> EngineResult<()> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            state.ack(
                self.inner.clock.as_ref(),
                &self.inner.config,
                &self.inner.metrics,
                lease_id,
                detail,
                &mut events,
            )
        };
        self.emit_all(events);
        result
    }

    /// Negatively acknowledges a lease, optionally requeuing.
    pub fn nack(
        &self,
        lease_id: &str,
        requeue: bool,
        priority_override: Option<i64>,
        reason: &str,
    ) -> EngineResult<()> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            let result = state.nack(
                self.inner.clock.as_ref(),
                &self.inner.config,
                &self.inner.metrics,
                lease_id,
                requeue,
                priority_override,
                reason,
                &mut events,
            );
            if result.is_ok() && requeue {
                state.wake_front_waiter();
            }
            result
        };
        self.emit_all(events);
        result
    }

    /// Moves a lease's expiry forward. Returns the new `expires_at`.
    pub fn extend_lease(&self, lease_id: &str, additional_ttl: Duration) -> EngineResult<u64> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            state.extend_lease(
                self.inner.clock.as_ref(),
                &self.inner.config,
                &self.inner.metrics,
                lease_id,
                additional_ttl,
                &mut events,
            )
        };
        self.emit_all(events);
        // A shorter extension is unusual but not forbidden; wake the reaper
        // unconditionally so it recomputes against the new deadline rather
        // than the one it was already sleeping toward.
        self.inner.reaper_wake.notify_one();
        result
    }

    /// Removes terminal items older than `older_than`. Returns the count
    /// removed.
    pub fn gc(&self, older_than: Duration) -> usize {
        let now = self.inner.clock.now();
        let mut events = Vec::new();
        let removed = {
            let mut state = self.inner.state.lock();
            state.gc(&self.inner.metrics, now, older_than, &mut events)
        };
        self.emit_all(events);
        removed
    }

    /// Runs `filter`/`cursor`/`limit` against a consistent snapshot of all
    /// items, in any lifecycle state. Never mutates state.
    pub fn query(&self, filter: &Filter, cursor: Option<&crate::query::Cursor>, limit: usize) -> Page {
        let now = self.inner.clock.now();
        let items: Vec<TriageItem> = {
            let state = self.inner.state.lock();
            state.items().cloned().collect()
        };
        let config = &self.inner.config;
        crate::query::run_query(items.iter(), filter, cursor, limit, |item| {
            if item.lifecycle_state.is_terminal() {
                item.base_priority
            } else {
                config
                    .aging_policy()
                    .effective_priority(item.scheduling_base, item.admitted_at, now)
            }
        })
    }

    /// A consistent snapshot of all counters/gauges/histograms.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Serializes the engine's current logical state.
    pub fn save_snapshot(&self) -> Result<Vec<u8>, PersistenceError> {
        let state = self.inner.state.lock();
        state.snapshot(self.inner.clock.now()).to_bytes()
    }

    /// Replaces the engine's logical state from previously saved bytes.
    /// Any `Leased` item is restored as `Pending` (`spec.md` §6, P7).
    pub fn restore_snapshot(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let snapshot = EngineSnapshot::from_bytes(bytes)?;
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.restore(&self.inner.config, snapshot, now);
        state.wake_front_waiter();
        Ok(())
    }

    /// Saves the current state through `store`.
    pub fn save_to(&self, store: &dyn SnapshotStore) -> Result<(), PersistenceError> {
        store.save(self.save_snapshot()?)
    }

    /// Restores state from `store`, if it holds a snapshot.
    pub fn restore_from(&self, store: &dyn SnapshotStore) -> Result<bool, PersistenceError> {
        match store.load()? {
            Some(bytes) => {
                self.restore_snapshot(&bytes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Refuses new `admit`/`lease` calls, wakes every blocked waiter with
    /// `ShuttingDown`, and stops the background aging and reaper tasks.
    /// Already-registered leases may still be `ack`/`nack`-ed so in-flight
    /// workers can report results during drain.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            state.wake_all_waiters();
        }
        self.aging_task.abort();
        self.reaper_task.abort();
    }
}

impl Drop for TriageEngine {
    fn drop(&mut self) {
        self.aging_task.abort();
        self.reaper_task.abort();
    }
}

async fn aging_tick_loop(inner: Arc<Inner>) {
    loop {
        inner.clock.after(inner.config.aging_interval).await;
        let mut state = inner.state.lock();
        if state.shutting_down {
            return;
        }
        let now = inner.clock.now();
        state.reage_all(&inner.config, now);
        if state.has_pending() {
            state.wake_front_waiter();
        }
    }
}

async fn reaper_loop(inner: Arc<Inner>) {
    loop {
        let wait = {
            let state = inner.state.lock();
            if state.shutting_down {
                return;
            }
            let now = inner.clock.now();
            match state.next_lease_expiry() {
                Some(expiry) if expiry > now => {
                    Duration::from_millis(expiry - now).min(inner.config.aging_interval)
                }
                Some(_) => Duration::ZERO,
                None => inner.config.aging_interval,
            }
        };
        // Race the computed wait against a wake signal: a lease granted or
        // extended after `wait` was computed may expire sooner than it, and
        // this reaper must not sleep past that (`spec.md` §4.5/§4.6).
        tokio::select! {
            _ = inner.clock.after(wait) => {}
            _ = inner.reaper_wake.notified() => {}
        }

        let mut events = Vec::new();
        {
            let mut state = inner.state.lock();
            if state.shutting_down {
                return;
            }
            let now = inner.clock.now();
            state.expire_due_leases(&inner.config, &inner.metrics, now, &mut events);
            if state.has_pending() {
                state.wake_front_waiter();
            }
        }
        for event in events {
            inner.audit.emit(event);
        }
    }
}
