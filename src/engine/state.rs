//! `EngineState` — the data guarded by `TriageEngine`'s single mutex.
//!
//! Everything here is synchronous, sub-microsecond bookkeeping: no `.await`
//! point may ever appear below this module, which is what lets
//! `TriageEngine` hold `parking_lot::Mutex<EngineState>` across a public
//! operation without risking a held lock across suspension (`spec.md` §5).
//!
//! Methods never call an `AuditSink` directly: a real sink may do
//! out-of-process I/O, and that must not happen while the mutex is held
//! (`spec.md` §5). Instead every method appends the `AuditEvent`s it
//! produces to an `events` out-parameter; `TriageEngine` drains the mutex
//! guard first and emits them afterward.
#![allow(clippy::expect_used)] // invariant violations are fatal aborts, not recoverable errors

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::clock::{Clock, Millis};
use crate::config::EngineConfig;
use crate::error::{EngineResult, ErrorKind};
use crate::item::{AdmissionSequence, ItemId, Lease, LeaseId, LifecycleState, Payload, TriageItem};
use crate::item_store::ItemStore;
use crate::lease::LeaseTracker;
use crate::metrics::MetricsRegistry;
use crate::persistence::EngineSnapshot;
use crate::priority_index::{HeapKey, PriorityIndex};

/// A granted lease, returned by a successful `Lease` call.
#[derive(Debug, Clone)]
pub struct LeaseGrant {
    /// Id of the new lease.
    pub lease_id: LeaseId,
    /// The item, in its post-lease state.
    pub item: TriageItem,
}

/// One caller waiting in the FIFO queue for a `Lease` to succeed.
struct Waiter {
    ticket: u64,
    notify: Arc<Notify>,
}

/// The bound on opportunistic re-aging re-insertions performed by a single
/// `Lease` call at the head of the queue (`spec.md` §4.5).
const MAX_OPPORTUNISTIC_REAGE: usize = 8;

/// C2 + C3 + C6, plus the bookkeeping (admission sequence, shutdown flag,
/// FIFO waiter queue) that must be serialized with them.
pub struct EngineState {
    item_store: ItemStore,
    priority_index: PriorityIndex,
    lease_tracker: LeaseTracker,
    admission_sequence: AdmissionSequence,
    pub(super) shutting_down: bool,
    waiters: VecDeque<Waiter>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            item_store: ItemStore::new(),
            priority_index: PriorityIndex::new(),
            lease_tracker: LeaseTracker::new(),
            admission_sequence: 0,
            shutting_down: false,
            waiters: VecDeque::new(),
        }
    }

    /// Whether any `Pending` item is currently schedulable.
    pub fn has_pending(&self) -> bool {
        self.priority_index.size() > 0
    }

    /// Registers `ticket`/`notify` as waiting, unless already registered.
    pub fn register_waiter(&mut self, ticket: u64, notify: Arc<Notify>) {
        if self.waiters.iter().any(|w| w.ticket == ticket) {
            return;
        }
        self.waiters.push_back(Waiter { ticket, notify });
    }

    /// Whether `ticket` is at the front of the FIFO queue (or the queue is
    /// empty, in which case any newcomer may try immediately).
    pub fn is_front_or_empty(&self, ticket: u64) -> bool {
        self.waiters.front().map(|w| w.ticket) == Some(ticket) || self.waiters.is_empty()
    }

    /// Removes `ticket` from the queue, if present (success, cancellation,
    /// or deadline expiry).
    pub fn remove_waiter(&mut self, ticket: u64) {
        self.waiters.retain(|w| w.ticket != ticket);
    }

    /// Wakes the caller at the front of the FIFO queue, if any. Called
    /// after any transition that might make a `Pending` item available.
    pub fn wake_front_waiter(&mut self) {
        if let Some(front) = self.waiters.front() {
            front.notify.notify_one();
        }
    }

    /// Wakes every waiter (used only by `shutdown`).
    pub fn wake_all_waiters(&mut self) {
        for waiter in &self.waiters {
            waiter.notify.notify_one();
        }
    }

    fn effective_key(config: &EngineConfig, item: &TriageItem, now: Millis) -> HeapKey {
        HeapKey {
            effective_priority: config
                .aging_policy()
                .effective_priority(item.scheduling_base, item.admitted_at, now),
            sequence: item.admission_sequence,
        }
    }

    // ----- Admit -----------------------------------------------------

    pub fn admit(
        &mut self,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        id: ItemId,
        base_priority: i64,
        payload: Payload,
        now: Millis,
        events: &mut Vec<AuditEvent>,
    ) -> EngineResult<ItemId> {
        if self.item_store.contains(&id) {
            return Err(ErrorKind::DuplicateId { id });
        }
        if !config.priority_set.contains(&base_priority) {
            return Err(ErrorKind::InvalidPriority {
                priority: base_priority,
            });
        }
        if self.item_store.len() >= config.max_items {
            metrics.on_capacity_rejected();
            return Err(ErrorKind::CapacityExceeded {
                max_items: config.max_items,
            });
        }

        let sequence = self.admission_sequence;
        self.admission_sequence += 1;

        let mut item = TriageItem {
            id: id.clone(),
            base_priority,
            admitted_at: now,
            admission_sequence: sequence,
            scheduling_base: base_priority,
            payload,
            lifecycle_state: LifecycleState::Pending,
            lease: None,
            retries: 0,
            history: Vec::new(),
            terminal_at: None,
        };
        item.push_history(now, "admitted", format!("base_priority={base_priority}"));

        let key = Self::effective_key(config, &item, now);
        self.priority_index.insert(id.clone(), key);
        self.item_store.put(item);

        metrics.on_admit(base_priority);
        events.push(AuditEvent::Admitted {
            id: id.clone(),
            base_priority,
            at: now,
        });
        Ok(id)
    }

    // ----- Lease -------------------------------------------------------

    /// Attempts to grant a lease immediately. Returns `Ok(None)` if no
    /// `Pending` item is currently available.
    pub fn try_lease(
        &mut self,
        clock: &dyn Clock,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        worker_id: String,
        lease_ttl: std::time::Duration,
        events: &mut Vec<AuditEvent>,
    ) -> EngineResult<Option<LeaseGrant>> {
        let now = clock.now();

        // Opportunistic re-aging at the head of the queue, bounded so a
        // single call can never spin (`spec.md` §4.5).
        for _ in 0..MAX_OPPORTUNISTIC_REAGE {
            let Some(top_id) = self.priority_index.peek() else {
                return Ok(None);
            };
            let stored_key = self
                .priority_index
                .current_key(&top_id)
                .expect("invariant: peeked id must have a current key");
            let item = self
                .item_store
                .get(&top_id)
                .expect("invariant: indexed id must exist in the store");
            let fresh_key = Self::effective_key(config, item, now);
            if fresh_key.effective_priority <= stored_key.effective_priority {
                break;
            }
            self.priority_index.insert(top_id, fresh_key);
        }

        let Some(item_id) = self.priority_index.pop_max() else {
            return Ok(None);
        };

        let lease_id = Uuid::new_v4().to_string();
        let expires_at = now.saturating_add(lease_ttl.as_millis() as u64);

        let item = self
            .item_store
            .get_mut(&item_id)
            .expect("invariant: popped id must exist in the store");
        if item.lifecycle_state != LifecycleState::Pending {
            panic!(
                "invariant violation: PriorityIndex yielded item {item_id} in state {:?}, expected Pending",
                item.lifecycle_state
            );
        }
        let base_priority = item.base_priority;
        let wait_ms = now.saturating_sub(item.admitted_at);

        item.lifecycle_state = LifecycleState::Leased;
        item.lease = Some(Lease {
            lease_id: lease_id.clone(),
            worker_id: worker_id.clone(),
            leased_at: now,
            expires_at,
        });
        item.push_history(now, "leased", format!("worker_id={worker_id}"));
        let item_snapshot = item.clone();

        self.lease_tracker.insert(lease_id.clone(), item_id.clone(), expires_at);
        metrics.on_lease(base_priority, wait_ms);
        events.push(AuditEvent::Leased {
            id: item_id,
            lease_id: lease_id.clone(),
            worker_id,
            at: now,
        });

        Ok(Some(LeaseGrant {
            lease_id,
            item: item_snapshot,
        }))
    }

    // ----- Ack / Nack / ExtendLease -------------------------------------

    /// Resolves `lease_id` to its item, transparently performing a lease
    /// expiry requeue (and returning `LeaseExpired`) if the lease is past
    /// its deadline but the reaper hasn't reclaimed it yet.
    fn resolve_active_lease(
        &mut self,
        clock: &dyn Clock,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        lease_id: &str,
        events: &mut Vec<AuditEvent>,
    ) -> EngineResult<ItemId> {
        let Some(item_id) = self.lease_tracker.item_for(lease_id).cloned() else {
            return Err(ErrorKind::UnknownLease {
                lease_id: lease_id.to_string(),
            });
        };
        let now = clock.now();
        let expires_at = self
            .item_store
            .get(&item_id)
            .and_then(|item| item.lease.as_ref())
            .expect("invariant: lease_tracker entry must have a matching item lease")
            .expires_at;

        if expires_at <= now {
            self.expire_one_lease(config, metrics, lease_id.to_string(), item_id, now, events);
            return Err(ErrorKind::LeaseExpired {
                lease_id: lease_id.to_string(),
            });
        }
        Ok(item_id)
    }

    pub fn ack(
        &mut self,
        clock: &dyn Clock,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        lease_id: &str,
        detail: &str,
        events: &mut Vec<AuditEvent>,
    ) -> EngineResult<()> {
        let item_id = self.resolve_active_lease(clock, config, metrics, lease_id, events)?;
        let now = clock.now();

        self.lease_tracker.remove(lease_id);
        let item = self
            .item_store
            .get_mut(&item_id)
            .expect("invariant: resolved lease must reference an existing item");
        if item.lifecycle_state.is_terminal() {
            return Err(ErrorKind::AlreadyTerminal { id: item_id });
        }
        let leased_at = item
            .lease
            .as_ref()
            .expect("invariant: item in Leased state must carry a lease")
            .leased_at;
        let base_priority = item.base_priority;

        item.lifecycle_state = LifecycleState::Completed;
        item.lease = None;
        item.terminal_at = Some(now);
        item.push_history(now, "acked", detail.to_string());

        let service_ms = now.saturating_sub(leased_at);
        metrics.on_ack(base_priority, service_ms);
        events.push(AuditEvent::Acked {
            id: item_id,
            lease_id: lease_id.to_string(),
            at: now,
        });
        Ok(())
    }

    pub fn nack(
        &mut self,
        clock: &dyn Clock,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        lease_id: &str,
        requeue: bool,
        priority_override: Option<i64>,
        reason: &str,
        events: &mut Vec<AuditEvent>,
    ) -> EngineResult<()> {
        let item_id = self.resolve_active_lease(clock, config, metrics, lease_id, events)?;
        let now = clock.now();

        if requeue {
            if let Some(override_priority) = priority_override {
                let base_priority = self
                    .item_store
                    .get(&item_id)
                    .expect("invariant: resolved lease must reference an existing item")
                    .base_priority;
                if !config.priority_set.contains(&override_priority) || override_priority > base_priority {
                    return Err(ErrorKind::InvalidArgument {
                        reason: format!(
                            "priority_override {override_priority} must be in the configured priority set and <= base_priority {base_priority}"
                        ),
                    });
                }
            }
        }

        self.lease_tracker.remove(lease_id);
        let item = self
            .item_store
            .get_mut(&item_id)
            .expect("invariant: resolved lease must reference an existing item");
        if item.lifecycle_state.is_terminal() {
            return Err(ErrorKind::AlreadyTerminal { id: item_id });
        }
        let leased_at = item
            .lease
            .as_ref()
            .expect("invariant: item in Leased state must carry a lease")
            .leased_at;
        let base_priority = item.base_priority;
        item.lease = None;

        if !requeue {
            item.lifecycle_state = LifecycleState::Failed;
            item.terminal_at = Some(now);
            item.push_history(now, "nacked_failed", reason.to_string());
            let service_ms = now.saturating_sub(leased_at);
            metrics.on_nack_failed(service_ms);
            events.push(AuditEvent::Nacked {
                id: item_id,
                lease_id: lease_id.to_string(),
                requeued: false,
                reason: reason.to_string(),
                at: now,
            });
            return Ok(());
        }

        item.retries += 1;
        if item.retries > config.retry_cap {
            item.lifecycle_state = LifecycleState::Failed;
            item.terminal_at = Some(now);
            item.push_history(now, "nacked_failed", format!("{reason} (retry_cap exceeded)"));
            let service_ms = now.saturating_sub(leased_at);
            metrics.on_nack_failed(service_ms);
            events.push(AuditEvent::Nacked {
                id: item_id,
                lease_id: lease_id.to_string(),
                requeued: false,
                reason: reason.to_string(),
                at: now,
            });
            return Ok(());
        }

        if let Some(override_priority) = priority_override {
            item.scheduling_base = override_priority;
        }
        item.lifecycle_state = LifecycleState::Pending;
        item.push_history(now, "nacked_requeued", reason.to_string());
        let key = Self::effective_key(config, item, now);
        self.priority_index.insert(item_id.clone(), key);

        metrics.on_nack_requeued(base_priority);
        events.push(AuditEvent::Nacked {
            id: item_id,
            lease_id: lease_id.to_string(),
            requeued: true,
            reason: reason.to_string(),
            at: now,
        });
        Ok(())
    }

    pub fn extend_lease(
        &mut self,
        clock: &dyn Clock,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        lease_id: &str,
        additional_ttl: std::time::Duration,
        events: &mut Vec<AuditEvent>,
    ) -> EngineResult<Millis> {
        let item_id = self.resolve_active_lease(clock, config, metrics, lease_id, events)?;
        let now = clock.now();
        let item = self
            .item_store
            .get_mut(&item_id)
            .expect("invariant: resolved lease must reference an existing item");
        let current_expiry = item
            .lease
            .as_ref()
            .expect("invariant: item in Leased state must carry a lease")
            .expires_at;
        let new_expires_at = current_expiry.saturating_add(additional_ttl.as_millis() as u64);

        if !self.lease_tracker.extend(lease_id, new_expires_at) {
            return Err(ErrorKind::UnknownLease {
                lease_id: lease_id.to_string(),
            });
        }
        let item = self
            .item_store
            .get_mut(&item_id)
            .expect("invariant: resolved lease must reference an existing item");
        item.lease.as_mut().expect("checked above").expires_at = new_expires_at;
        item.push_history(now, "lease_extended", format!("new_expires_at={new_expires_at}"));
        Ok(new_expires_at)
    }

    // ----- Lease expiry (reaper) ----------------------------------------

    fn expire_one_lease(
        &mut self,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        lease_id: LeaseId,
        item_id: ItemId,
        now: Millis,
        events: &mut Vec<AuditEvent>,
    ) {
        self.lease_tracker.remove(&lease_id);
        let item = self
            .item_store
            .get_mut(&item_id)
            .expect("invariant: expired lease must reference an existing item");
        let leased_at = item
            .lease
            .take()
            .map(|lease| lease.leased_at)
            .unwrap_or(item.admitted_at);
        let base_priority = item.base_priority;

        item.retries += 1;
        if item.retries > config.retry_cap {
            item.lifecycle_state = LifecycleState::Failed;
            item.terminal_at = Some(now);
            item.push_history(now, "lease_expired_failed", format!("lease {lease_id} expired, retry cap exceeded"));
            let service_ms = now.saturating_sub(leased_at);
            metrics.on_nack_failed(service_ms);
        } else {
            item.lifecycle_state = LifecycleState::Pending;
            item.push_history(now, "lease_expired", format!("lease {lease_id} expired, requeued"));
            let key = Self::effective_key(config, item, now);
            self.priority_index.insert(item_id.clone(), key);
            metrics.on_lease_expired(base_priority);
        }

        events.push(AuditEvent::LeaseExpired {
            id: item_id,
            lease_id,
            at: now,
        });
    }

    /// Reclaims every lease whose deadline is `<= now`. Called by the
    /// reaper task.
    pub fn expire_due_leases(
        &mut self,
        config: &EngineConfig,
        metrics: &MetricsRegistry,
        now: Millis,
        events: &mut Vec<AuditEvent>,
    ) {
        for (lease_id, item_id) in self.lease_tracker.drain_expired(now) {
            self.expire_one_lease(config, metrics, lease_id, item_id, now, events);
        }
    }

    /// The earliest outstanding lease expiry, if any.
    pub fn next_lease_expiry(&self) -> Option<Millis> {
        self.lease_tracker.next_expiry()
    }

    // ----- Aging tick -----------------------------------------------------

    /// Re-evaluates every `Pending` item's effective priority and
    /// re-inserts it if it has drifted from its stored key
    /// (`spec.md` §4.5's background aging tick).
    pub fn reage_all(&mut self, config: &EngineConfig, now: Millis) {
        let ids: Vec<ItemId> = self.priority_index.ids().cloned().collect();
        for id in ids {
            let Some(stored_key) = self.priority_index.current_key(&id) else {
                continue;
            };
            let Some(item) = self.item_store.get(&id) else {
                continue;
            };
            let fresh_key = Self::effective_key(config, item, now);
            if fresh_key.effective_priority != stored_key.effective_priority {
                self.priority_index.insert(id, fresh_key);
            }
        }
    }

    // ----- Query / metrics / gc ------------------------------------------

    pub fn items(&self) -> impl Iterator<Item = &TriageItem> {
        self.item_store.iter()
    }

    pub fn gc(
        &mut self,
        metrics: &MetricsRegistry,
        now: Millis,
        older_than: std::time::Duration,
        events: &mut Vec<AuditEvent>,
    ) -> usize {
        let cutoff = now.saturating_sub(older_than.as_millis() as u64);
        let terminal_ids: Vec<ItemId> = self
            .item_store
            .iter()
            .filter(|item| {
                item.lifecycle_state.is_terminal()
                    && item.terminal_at.map(|t| t <= cutoff).unwrap_or(false)
            })
            .map(|item| item.id.clone())
            .collect();

        let mut by_state: Vec<(LifecycleState, i64)> = Vec::new();
        for id in &terminal_ids {
            if let Some(item) = self.item_store.remove(id) {
                if let Some(entry) = by_state.iter_mut().find(|(s, _)| *s == item.lifecycle_state) {
                    entry.1 += 1;
                } else {
                    by_state.push((item.lifecycle_state, 1));
                }
            }
        }
        let count = terminal_ids.len();
        if count > 0 {
            metrics.on_gc(count as u64, &by_state);
            events.push(AuditEvent::GarbageCollected {
                count,
                at: now,
            });
        }
        count
    }

    // ----- Persistence -----------------------------------------------------

    pub fn snapshot(&self, clock_offset_millis: Millis) -> EngineSnapshot {
        EngineSnapshot {
            version: crate::persistence::SNAPSHOT_VERSION,
            clock_offset_millis,
            admission_sequence: self.admission_sequence,
            items: self.item_store.iter().cloned().collect(),
        }
    }

    /// Replaces all logical state with `snapshot`. Any `Leased` item is
    /// restored as `Pending` with its lease cleared (`spec.md` §6).
    pub fn restore(&mut self, config: &EngineConfig, snapshot: EngineSnapshot, now: Millis) {
        self.item_store = ItemStore::new();
        self.priority_index = PriorityIndex::new();
        self.lease_tracker = LeaseTracker::new();
        self.admission_sequence = snapshot.admission_sequence;

        for mut item in snapshot.items {
            if item.lifecycle_state == LifecycleState::Leased {
                item.lifecycle_state = LifecycleState::Pending;
                item.lease = None;
                item.push_history(now, "restored_pending", "lease cleared on restore".to_string());
            }
            if item.lifecycle_state == LifecycleState::Pending {
                let key = Self::effective_key(config, &item, now);
                self.priority_index.insert(item.id.clone(), key);
            }
            self.item_store.put(item);
        }
    }
}
