//! Clock (C1) — the engine's single time-injection seam.
//!
//! All time-dependent logic (aging, lease expiry, the reaper) reads `now()`
//! from a [`Clock`] and parks on [`Clock::after`] rather than touching OS
//! time or `tokio::time` directly, so tests can supply a [`FakeClock`] and
//! advance it deterministically instead of sleeping.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Milliseconds since the clock's epoch (engine start, for `SystemClock`;
/// an arbitrary zero point for `FakeClock`). Used instead of
/// `std::time::Instant` so it can be persisted in snapshots and constructed
/// freely in tests.
pub type Millis = u64;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A monotonic time source with an async sleep primitive.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic time in milliseconds since the clock's epoch.
    fn now(&self) -> Millis;

    /// Returns a future that resolves no earlier than `duration` from now.
    fn after(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Real wall-clock implementation, backed by `std::time::Instant` for
/// monotonicity and `tokio::time::sleep` for the async seam.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl SystemClock {
    /// Creates a new system clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        self.start.elapsed().as_millis() as Millis
    }

    fn after(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic test clock. `now()` only moves when a test calls
/// [`FakeClock::advance`]; any task parked in [`Clock::after`] wakes as soon
/// as the advance crosses its deadline, with no real sleeping involved.
#[derive(Debug, Clone)]
pub struct FakeClock {
    millis: Arc<AtomicU64>,
    tx: watch::Sender<Millis>,
}

impl FakeClock {
    /// Creates a fake clock starting at `t = 0`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            millis: Arc::new(AtomicU64::new(0)),
            tx,
        }
    }

    /// Advances the clock by `duration`, waking any task parked on
    /// [`Clock::after`] whose deadline has now passed.
    pub fn advance(&self, duration: Duration) {
        let new_value = self.millis.fetch_add(duration.as_millis() as u64, Ordering::SeqCst)
            + duration.as_millis() as u64;
        // Receivers that have already lagged behind will still observe the
        // latest value on their next `changed()` poll.
        let _ = self.tx.send(new_value);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Millis {
        self.millis.load(Ordering::SeqCst)
    }

    fn after(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let deadline = self.now() + duration.as_millis() as u64;
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            loop {
                if *rx.borrow() >= deadline {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Sender dropped (clock gone); nothing left to wait for.
                    return;
                }
            }
        })
    }
}
