//! Bounded retry policy used by the convergence waiter

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to poll and how long to sleep before each poll
///
/// Attempt `n` (zero-based) sleeps `backoff_schedule[n]`, or the last entry
/// once the schedule is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_schedule: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_schedule: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            backoff_schedule,
        }
    }

    /// Build a policy from a schedule expressed in whole seconds
    pub fn from_secs(max_attempts: u32, schedule: &[u64]) -> Self {
        Self::new(
            max_attempts,
            schedule.iter().copied().map(Duration::from_secs).collect(),
        )
    }

    /// Delay before the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_schedule
            .get(attempt as usize)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Upper bound on time spent sleeping across all attempts
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_matches_schedule() {
        let policy = RetryPolicy::from_secs(3, &[30, 60, 120]);
        assert_eq!(policy.total_budget(), Duration::from_secs(210));
    }

    #[test]
    fn test_last_delay_repeats() {
        let policy = RetryPolicy::from_secs(5, &[1, 2]);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
        assert_eq!(policy.total_budget(), Duration::from_secs(9));
    }

    #[test]
    fn test_empty_schedule_never_sleeps() {
        let policy = RetryPolicy::new(4, Vec::new());
        assert_eq!(policy.total_budget(), Duration::ZERO);
    }
}
