//! # Retry Backoff Policy
//!
//! Retries are scheduled by a lookup table instead of a computed delay. A
//! record is due when it has failed fewer than `unconditional_below` times,
//! or when some tier's elapsed window has passed since its last failure and
//! its attempt count is still under that tier's ceiling.
//!
//! | since last failure | allowed attempts |
//! |--------------------|------------------|
//! | any                | < 3              |
//! | > 1 hour           | < 12             |
//! | > 2 hours          | < 25             |
//! | > 6 hours          | < 40             |
//! | > 12 hours         | < 50             |
//! | > 1 day            | < 60             |
//! | > 3 days           | < 70             |
//! | > 7 days           | < 90             |
//! | > 14 days          | < 100            |
//!
//! Records at or above the last ceiling are never selected again.

use chrono::{DateTime, Duration, Utc};

/// One step of the staircase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffTier {
    /// Minimum time since the last failed attempt (exclusive)
    pub elapsed: Duration,
    /// Attempt count must be strictly below this
    pub ceiling: i64,
}

impl BackoffTier {
    pub const fn new(elapsed: Duration, ceiling: i64) -> Self {
        Self { elapsed, ceiling }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    unconditional_below: i64,
    tiers: Vec<BackoffTier>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            3,
            vec![
                BackoffTier::new(Duration::hours(1), 12),
                BackoffTier::new(Duration::hours(2), 25),
                BackoffTier::new(Duration::hours(6), 40),
                BackoffTier::new(Duration::hours(12), 50),
                BackoffTier::new(Duration::days(1), 60),
                BackoffTier::new(Duration::days(3), 70),
                BackoffTier::new(Duration::days(7), 90),
                BackoffTier::new(Duration::days(14), 100),
            ],
        )
    }
}

impl BackoffPolicy {
    /// Tiers are sorted by elapsed window.
    pub fn new(unconditional_below: i64, mut tiers: Vec<BackoffTier>) -> Self {
        tiers.sort_by_key(|tier| tier.elapsed);
        Self {
            unconditional_below,
            tiers,
        }
    }

    pub fn unconditional_below(&self) -> i64 {
        self.unconditional_below
    }

    pub fn tiers(&self) -> &[BackoffTier] {
        &self.tiers
    }

    /// Attempt count at which a record is abandoned for good
    pub fn terminal_ceiling(&self) -> i64 {
        self.tiers
            .iter()
            .map(|tier| tier.ceiling)
            .chain(std::iter::once(self.unconditional_below))
            .max()
            .unwrap_or(self.unconditional_below)
    }

    /// Highest ceiling unlocked after `elapsed` has passed since the last failure
    pub fn ceiling_after(&self, elapsed: Duration) -> i64 {
        self.tiers
            .iter()
            .filter(|tier| elapsed > tier.elapsed)
            .map(|tier| tier.ceiling)
            .chain(std::iter::once(self.unconditional_below))
            .max()
            .unwrap_or(self.unconditional_below)
    }

    /// Whether an unprocessed record is due for another attempt.
    ///
    /// Compares at whole-second resolution, like the stored timestamps.
    pub fn is_due(
        &self,
        attempt_count: i64,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if attempt_count < self.unconditional_below {
            return true;
        }
        let Some(last) = last_attempt_at else {
            return false;
        };
        let elapsed = Duration::seconds(now.timestamp() - last.timestamp());
        attempt_count < self.ceiling_after(elapsed)
    }
}
