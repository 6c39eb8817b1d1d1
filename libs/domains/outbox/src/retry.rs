//! Backoff schedule for failed delivery attempts.

use chrono::{DateTime, TimeDelta, Utc};

/// Attempts after which an entry is cancelled instead of rescheduled.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 4;

/// What to do with an entry after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Retry { next_scheduled_at: DateTime<Utc> },
    Cancel,
}

/// Delay table indexed by the attempt count *after* the failure.
///
/// With the defaults `[0s, 60s, 300s, 1800s]`: the first failure waits 60s,
/// the second 300s, the third 1800s, and the fourth cancels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<TimeDelta>,
    max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![
                TimeDelta::zero(),
                TimeDelta::seconds(60),
                TimeDelta::seconds(300),
                TimeDelta::seconds(1800),
            ],
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: Vec<TimeDelta>, max_attempts: i32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Index is capped at the last slot of the table.
    pub fn delay_for(&self, attempts: i32) -> TimeDelta {
        if self.backoff.is_empty() {
            return TimeDelta::zero();
        }
        let idx = (attempts.max(0) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }

    pub fn decide(&self, attempts: i32, now: DateTime<Utc>) -> FailureDecision {
        if attempts >= self.max_attempts {
            FailureDecision::Cancel
        } else {
            FailureDecision::Retry {
                next_scheduled_at: now + self.delay_for(attempts),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), TimeDelta::zero());
        assert_eq!(policy.delay_for(1), TimeDelta::seconds(60));
        assert_eq!(policy.delay_for(2), TimeDelta::seconds(300));
        assert_eq!(policy.delay_for(3), TimeDelta::seconds(1800));
        assert_eq!(policy.delay_for(9), TimeDelta::seconds(1800));
    }

    #[test]
    fn test_decide_reschedules_below_cap() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        assert_eq!(
            policy.decide(1, now),
            FailureDecision::Retry {
                next_scheduled_at: now + TimeDelta::seconds(60)
            }
        );
        assert_eq!(
            policy.decide(3, now),
            FailureDecision::Retry {
                next_scheduled_at: now + TimeDelta::seconds(1800)
            }
        );
    }

    #[test]
    fn test_decide_cancels_at_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(4, Utc::now()), FailureDecision::Cancel);
        assert_eq!(policy.decide(7, Utc::now()), FailureDecision::Cancel);
    }

    #[test]
    fn test_empty_table_retries_immediately() {
        let policy = RetryPolicy::new(Vec::new(), 2);
        let now = Utc::now();
        assert_eq!(
            policy.decide(1, now),
            FailureDecision::Retry { next_scheduled_at: now }
        );
    }
}
