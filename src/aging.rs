//! AgingPolicy (C4) — deterministic, starvation-free priority promotion.
//!
//! `effective_priority` is a pure, total function of `(base, admitted_at,
//! now)`: non-decreasing in `now`, saturating at `ceiling`. No component
//! reads aging from anywhere but this module.

use std::time::Duration;

use crate::clock::Millis;
use crate::error::ErrorKind;

/// Aging schedule: how fast `Pending` items are promoted to avoid
/// starvation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgingPolicy {
    /// Interval after which a pending item is promoted by `bump`.
    step: Duration,
    /// Priority points added per elapsed `step`.
    bump: i64,
    /// Ceiling effective priority can never exceed (typically `URGENT`).
    ceiling: i64,
}

impl AgingPolicy {
    /// Builds a policy, rejecting a non-positive step or a negative bump —
    /// either would make aging non-monotone or a no-op forever.
    pub fn new(step: Duration, bump: i64, ceiling: i64) -> Result<Self, ErrorKind> {
        if step.is_zero() {
            return Err(ErrorKind::InvalidArgument {
                reason: "aging.step must be positive".to_string(),
            });
        }
        if bump < 0 {
            return Err(ErrorKind::InvalidArgument {
                reason: "aging.bump must be non-negative".to_string(),
            });
        }
        Ok(Self {
            step,
            bump,
            ceiling,
        })
    }

    /// The configured promotion step.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// The configured promotion bump.
    pub fn bump(&self) -> i64 {
        self.bump
    }

    /// Computes the effective priority of an item admitted at
    /// `admitted_at` with the given `base` priority, observed at `now`.
    ///
    /// Total and monotone non-decreasing in `now`; saturates at `ceiling`.
    pub fn effective_priority(&self, base: i64, admitted_at: Millis, now: Millis) -> i64 {
        let elapsed_ms = now.saturating_sub(admitted_at);
        let step_ms = self.step.as_millis().max(1) as u64;
        let steps = elapsed_ms / step_ms;
        let bumped = base.saturating_add((steps as i64).saturating_mul(self.bump));
        bumped.min(self.ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::{HIGH, LOW, MEDIUM, URGENT};

    fn default_policy() -> AgingPolicy {
        AgingPolicy::new(Duration::from_secs(5 * 60), 5, URGENT).unwrap()
    }

    #[test]
    fn no_aging_at_admission() {
        let policy = default_policy();
        assert_eq!(policy.effective_priority(LOW, 0, 0), LOW);
    }

    #[test]
    fn low_reaches_high_after_forty_minutes() {
        let policy = default_policy();
        let forty_minutes_ms = 40 * 60 * 1000;
        assert_eq!(policy.effective_priority(LOW, 0, forty_minutes_ms), HIGH);
    }

    #[test]
    fn low_reaches_urgent_after_sixty_five_minutes_and_saturates() {
        let policy = default_policy();
        let sixty_five_minutes_ms = 65 * 60 * 1000;
        assert_eq!(
            policy.effective_priority(LOW, 0, sixty_five_minutes_ms),
            URGENT
        );
        // Further elapsed time must not exceed the ceiling.
        let much_later_ms = 10 * 60 * 60 * 1000;
        assert_eq!(policy.effective_priority(LOW, 0, much_later_ms), URGENT);
    }

    #[test]
    fn monotone_non_decreasing_in_now() {
        let policy = default_policy();
        let mut previous = policy.effective_priority(MEDIUM, 1_000, 1_000);
        for now in (1_000..200_000).step_by(1_000) {
            let current = policy.effective_priority(MEDIUM, 1_000, now);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn rejects_zero_step() {
        assert!(AgingPolicy::new(Duration::from_secs(0), 5, URGENT).is_err());
    }

    #[test]
    fn rejects_negative_bump() {
        assert!(AgingPolicy::new(Duration::from_secs(60), -1, URGENT).is_err());
    }
}
