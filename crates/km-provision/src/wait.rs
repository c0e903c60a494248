//! Bounded polling for eventually-consistent control-plane state.
//!
//! Role assignments take a while to become effective, resource group deletion
//! completes long after the request is accepted, and soft-deleted accounts show
//! up in the deleted listing with a delay. All three are handled by
//! [`wait_until`], which sleeps per the [`RetryPolicy`] schedule before each
//! check and gives up after `max_attempts` checks.

use backon::{BackoffBuilder, ExponentialBuilder};
use km_provision_common::RetryPolicy;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum WaitOutcome {
    /// The predicate returned true
    Converged,
    /// Every attempt was used without convergence
    TimedOut,
    /// The cancellation token fired while waiting
    Cancelled,
}

impl WaitOutcome {
    pub fn is_converged(self) -> bool {
        self == WaitOutcome::Converged
    }
}

/// Build a doubling schedule with `backon`, capped at `max_delay`.
///
/// No jitter, so the total budget is predictable.
pub fn exponential_policy(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> RetryPolicy {
    let schedule: Vec<Duration> = ExponentialBuilder::default()
        .with_min_delay(min_delay)
        .with_max_delay(max_delay)
        .with_factor(2.0)
        .with_max_times(max_attempts as usize)
        .build()
        .collect();
    RetryPolicy::new(max_attempts, schedule)
}

/// Poll `check` until it reports convergence or the policy is exhausted.
///
/// Each attempt first sleeps `policy.delay_for(attempt)` and then evaluates
/// the predicate, so the time spent waiting never exceeds
/// `policy.total_budget()`. A failing check is logged and counts as "not yet";
/// timeouts are returned, never raised.
///
/// # Example
/// ```ignore
/// let outcome = wait_until(
///     &RetryPolicy::from_secs(3, &[30, 60, 120]),
///     Some(&cancel),
///     "role assignment on km-search",
///     || async { cp.list_role_assignments(&scope, principal).await.map(|a| !a.is_empty()) },
/// )
/// .await;
/// ```
pub async fn wait_until<F, Fut, E>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    what: &str,
    mut check: F,
) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for(attempt);
        debug!(
            what,
            attempt = attempt + 1,
            max_attempts = policy.max_attempts,
            delay_secs = delay.as_secs(),
            "Waiting before convergence check"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                debug!(what, "Wait cancelled");
                return WaitOutcome::Cancelled;
            }
        }

        match check().await {
            Ok(true) => {
                debug!(what, attempts = attempt + 1, "Converged");
                return WaitOutcome::Converged;
            }
            Ok(false) => {}
            Err(e) => warn!(what, attempt = attempt + 1, error = %e, "Convergence check failed"),
        }
    }

    warn!(
        what,
        attempts = policy.max_attempts,
        budget_secs = policy.total_budget().as_secs(),
        "Gave up waiting"
    );
    WaitOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn thirty_sixty_one_twenty() -> RetryPolicy {
        RetryPolicy::from_secs(3, &[30, 60, 120])
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let outcome = wait_until(&thirty_sixty_one_twenty(), None, "never", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(false)
            }
        })
        .await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed().as_secs() <= 210);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_second_check() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let outcome = wait_until(&thirty_sixty_one_twenty(), None, "soon", || {
            let calls = calls.clone();
            async move { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst) >= 1) }
        })
        .await;

        assert_eq!(outcome, WaitOutcome::Converged);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_keep_polling() {
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = wait_until(&thirty_sixty_one_twenty(), None, "flaky", || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("transient".to_string()),
                    _ => Ok(true),
                }
            }
        })
        .await;

        assert_eq!(outcome, WaitOutcome::Converged);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = wait_until(&thirty_sixty_one_twenty(), Some(&cancel), "cancelled", || async {
            Ok::<_, String>(false)
        })
        .await;

        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_policy_doubles_and_caps() {
        let policy = exponential_policy(5, Duration::from_secs(10), Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(
            policy.backoff_schedule,
            [10, 20, 40, 60, 60].map(Duration::from_secs).to_vec()
        );
    }
}
