//! Time source abstraction.
//!
//! Both the retrier and the rate limiter read time and sleep through a
//! [`Clock`] so tests can drive virtual time deterministically instead of
//! depending on wall-clock sleeps.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Injectable time source.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`, yielding to the scheduler.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests.
///
/// `sleep` returns immediately after advancing virtual time and records the
/// requested duration, so a test can assert the exact delay sequence a policy
/// produced. `advance` moves time without recording anything.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    slept: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move virtual time forward.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().expect("clock mutex poisoned");
        state.elapsed += duration;
    }

    /// Durations passed to `sleep`, in call order.
    pub fn slept(&self) -> Vec<Duration> {
        let state = self.state.lock().expect("clock mutex poisoned");
        state.slept.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.state.lock().expect("clock mutex poisoned");
        base_instant() + state.elapsed
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().expect("clock mutex poisoned");
        state.elapsed += duration;
        state.slept.push(duration);
    }
}

/// Fixed process-wide origin so every `ManualClock` reading is a plain
/// offset from the same instant.
fn base_instant() -> Instant {
    use std::sync::OnceLock;
    static BASE: OnceLock<Instant> = OnceLock::new();
    *BASE.get_or_init(Instant::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_manual_clock_records_sleeps() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_millis(100)).await;
        clock.sleep(Duration::from_millis(200)).await;

        assert_eq!(
            clock.slept(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(clock.now() - start, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_system_clock_sleeps() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(10)).await;
        assert!(clock.now() - start >= Duration::from_millis(10));
    }
}
