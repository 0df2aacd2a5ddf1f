//! Bounded retry for operations that fail under contention.
//!
//! The delay between attempts is fixed. The dominant failure is another
//! node holding the propose slot, which clears on a roughly uniform
//! timescale once its block arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{HarnessError, NodeError};

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first (total = max_attempts + 1)
    pub max_attempts: u32,
    /// Fixed wait between attempts
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` retries spaced `retry_delay` apart
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Upper bound on invocations under this policy
    pub fn total_attempts(&self) -> u64 {
        u64::from(self.max_attempts) + 1
    }

    /// Whether `attempts` failed invocations use up the policy
    pub fn is_exhausted(&self, attempts: u64) -> bool {
        attempts >= self.total_attempts()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3))
    }
}

/// Runs node operations under a `RetryPolicy`.
///
/// Contention errors are absorbed until the policy is exhausted; hard
/// errors propagate on first occurrence. Backoff sleeps go through the
/// injected clock and stop early if the cancellation token fires.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Retrier {
    /// Retrier with its own (never fired) cancellation token
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort backoff sleeps when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Policy in force
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds, fails hard, or attempts run out.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Node` for a non-retryable failure (one invocation)
    /// - `HarnessError::RetryExhausted` after `max_attempts + 1` contention
    ///   failures, carrying the last one
    /// - `HarnessError::Cancelled` if cancelled while backing off
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, HarnessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 && log::log_enabled!(log::Level::Debug) {
                        log::debug!("Succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(HarnessError::Node(err)),
                Err(err) => err,
            };

            if self.policy.is_exhausted(attempt) {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("{}; no more retries after {} attempt(s)", err, attempt);
                }
                return Err(HarnessError::RetryExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "{}; retrying in {:?} ({}/{})",
                    err,
                    self.policy.retry_delay,
                    attempt,
                    self.policy.max_attempts
                );
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(HarnessError::Cancelled {
                        operation: err.operation().to_string(),
                    });
                }
                _ = self.clock.sleep(self.policy.retry_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PausedClock;
    use crate::types::Operation;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retrier(max_attempts: u32) -> Retrier {
        Retrier::new(
            RetryPolicy::new(max_attempts, Duration::from_secs(3)),
            Arc::new(PausedClock::attach()),
        )
    }

    fn busy() -> NodeError {
        NodeError::contention(Operation::Propose, "node-1", 1, "propose slot busy")
    }

    /// Fails with contention `failures` times, then returns the attempt number
    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<u32, NodeError> {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= failures {
            Err(busy())
        } else {
            Ok(call)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_k_contention_failures() {
        for k in 0..=4 {
            let calls = AtomicU32::new(0);
            let result = retrier(4).run(|| flaky(&calls, k)).await;
            assert_eq!(result.unwrap(), k + 1);
            assert_eq!(calls.load(Ordering::SeqCst), k + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_attempts_plus_one() {
        let calls = AtomicU32::new(0);
        let result = retrier(2).run(|| flaky(&calls, 10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(HarnessError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.is_retryable());
                assert_eq!(last.node(), "node-1");
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retrier(5)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(NodeError::hard(Operation::Propose, "node-0", "unreachable")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(HarnessError::Node(NodeError::Hard { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_attempts() {
        let clock = Arc::new(PausedClock::attach());
        let retrier = Retrier::new(RetryPolicy::new(3, Duration::from_secs(2)), clock.clone());
        let start = clock.now();
        let calls = AtomicU32::new(0);

        retrier.run(|| flaky(&calls, 3)).await.unwrap();

        // three backoffs of exactly two seconds
        assert_eq!(clock.now() - start, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let retrier = retrier(10).with_cancellation(cancel.clone());
        cancel.cancel();

        let calls = AtomicU32::new(0);
        let result = retrier.run(|| flaky(&calls, 100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(HarnessError::Cancelled { .. })));
    }

    #[test]
    fn test_policy_totals() {
        assert_eq!(RetryPolicy::default().total_attempts(), 6);
        assert_eq!(RetryPolicy::no_retry().total_attempts(), 1);
        assert!(RetryPolicy::no_retry().is_exhausted(1));
        assert!(!RetryPolicy::default().is_exhausted(5));
        assert!(RetryPolicy::default().is_exhausted(6));
    }

    #[test]
    fn test_largest_policy_still_terminates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::ZERO);
        let total = u64::from(u32::MAX) + 1;

        assert_eq!(policy.total_attempts(), total);
        assert!(!policy.is_exhausted(u64::from(u32::MAX)));
        assert!(policy.is_exhausted(total));
    }

    #[tokio::test(start_paused = true)]
    async fn test_largest_policy_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retrier(u32::MAX).run(|| flaky(&calls, 25)).await;

        assert_eq!(result.unwrap(), 26);
    }
}
