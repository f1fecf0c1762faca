//! Sliding-window rate limiting.
//!
//! An admission gate that caps the number of operations permitted within a
//! trailing time window. Sliding-window semantics avoid burst-at-boundary
//! artifacts of fixed buckets; pruning is lazy, done on each query, so no
//! background timer is needed. The limiter never touches the retrier's state:
//! callers compose the two sequentially (consult the limiter, then wrap the
//! call in the retrier).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;

/// Sliding-window admission gate.
///
/// State is a mutex-guarded sequence of admission instants, oldest first.
/// The mutex makes the check-then-record step atomic under concurrent
/// callers; in a single-task host it is uncontended.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting at most `max_requests` per trailing `window`.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    /// Admit and record the current instant iff the window has room.
    ///
    /// A denied call records nothing.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().expect("rate limiter mutex poisoned");
        Self::prune(&mut admitted, now, self.window);

        if admitted.len() < self.max_requests {
            admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest admission exits the window; zero when under the
    /// limit. The transition back to admitting happens purely by time
    /// passing, never by an explicit reset.
    pub fn time_until_ready(&self) -> Duration {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().expect("rate limiter mutex poisoned");
        Self::prune(&mut admitted, now, self.window);

        if admitted.len() < self.max_requests {
            return Duration::ZERO;
        }
        match admitted.front() {
            Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    /// Admissions still available in the current window.
    pub fn remaining(&self) -> usize {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().expect("rate limiter mutex poisoned");
        Self::prune(&mut admitted, now, self.window);
        self.max_requests.saturating_sub(admitted.len())
    }

    // An instant aged exactly one window is out of the window.
    fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) >= window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
