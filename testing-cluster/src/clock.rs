// File: testing-cluster/src/clock.rs
//
// Clock Abstraction
//
// Every suspension point in the harness (retry backoff, convergence poll
// interval, timed-start spin, simulated gossip latency) sleeps through an
// injected Clock so tests can run against tokio's paused time.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Source of time and sleeps for the harness.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use tos_testing_cluster::clock::{Clock, SystemClock};
///
/// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
/// let start = clock.now();
/// clock.sleep(Duration::from_millis(100)).await;
/// assert!(clock.now() - start >= Duration::from_millis(100));
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real time, used against live nodes.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused clock (test environment)
///
/// Works with tokio's `time::pause()`: when every task is idle the runtime
/// jumps straight to the next pending timer, so a 30 second convergence
/// wait completes instantly while still observing correct ordering.
///
/// Use `#[tokio::test(start_paused = true)]`, or call `PausedClock::new()`
/// on a current-thread runtime, which pauses time itself.
pub struct PausedClock;

impl PausedClock {
    /// Creates a new PausedClock and pauses tokio time
    pub fn new() -> Self {
        time::pause();
        Self
    }

    /// Wrap already-paused time without calling `time::pause()` again
    pub fn attach() -> Self {
        Self
    }

    /// Manually advance time by the specified duration
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::attach()
    }
}
