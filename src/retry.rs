//! Retry with exponential backoff.
//!
//! Wraps an arbitrary async operation and re-invokes it on transient failure
//! per a [`RetryPolicy`]. Retry is purely failure-driven: a success on any
//! attempt returns immediately, and the final failure surfaces to the caller
//! unchanged, never wrapped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RetryConfig;
use crate::error::{CallError, ErrorCode, Result};

/// Decides whether a failure warrants another attempt.
///
/// Kept as a trait rather than a bare function pointer so concrete policies
/// stay inspectable and testable in isolation. Plain closures still work via
/// the blanket impl.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &CallError) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&CallError) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &CallError) -> bool {
        self(error)
    }
}

/// Default predicate: retries infrastructure markers (`unavailable`,
/// `internal`) and HTTP statuses in `[500, 600)`. Client errors, validation
/// errors, and business failures surface on first occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl RetryClassifier for DefaultClassifier {
    fn is_retryable(&self, error: &CallError) -> bool {
        if let Some(code) = error.code() {
            return matches!(code, ErrorCode::Unavailable | ErrorCode::Internal);
        }
        matches!(error.http_status(), Some(status) if (500..600).contains(&status))
    }
}

/// Predicate for cloud RPC backends: everything [`DefaultClassifier`] accepts
/// plus `deadline-exceeded`, `resource-exhausted`, and `unknown`, which those
/// backends report for transient conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcClassifier;

impl RetryClassifier for RpcClassifier {
    fn is_retryable(&self, error: &CallError) -> bool {
        if matches!(
            error.code(),
            Some(ErrorCode::DeadlineExceeded | ErrorCode::ResourceExhausted | ErrorCode::Unknown)
        ) {
            return true;
        }
        DefaultClassifier.is_retryable(error)
    }
}

/// Backoff policy for retrying operations.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    classifier: Arc<dyn RetryClassifier>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy from a [`RetryConfig`], with the default classifier.
    pub fn from_config(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    /// Default policy with the [`RpcClassifier`].
    pub fn rpc() -> Self {
        Self::default().classifier(RpcClassifier)
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn classifier<C: RetryClassifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Total invocation attempts allowed, including the first.
    pub fn attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether this policy's classifier would retry `error`.
    pub fn is_retryable(&self, error: &CallError) -> bool {
        self.classifier.is_retryable(error)
    }

    /// Delay after the failure of attempt `attempt` (1-based):
    /// `min(initial_delay * multiplier^(attempt - 1), max_delay)`.
    ///
    /// Clamped even for the first retry, so `initial_delay > max_delay`
    /// yields `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let scaled = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped_ms = scaled.min(self.max_delay.as_millis() as f64) as u64;

        let mut delay = Duration::from_millis(capped_ms);
        if self.jitter {
            use rand::Rng;
            // 0 to 10% of the delay
            let jitter_range = capped_ms / 10;
            if jitter_range > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..jitter_range));
            }
        }
        delay
    }
}

/// Drives operations through a [`RetryPolicy`] over an injected [`Clock`].
pub struct Retrier {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation`, retrying per the policy.
    ///
    /// The attempt counter starts at 1. A failure propagates immediately once
    /// the attempt budget is spent or the classifier rules it non-retryable;
    /// otherwise the caller is suspended for the computed delay and the
    /// operation is invoked again.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.policy.attempts() {
                        warn!(attempt, error = %error, "retry attempts exhausted");
                        return Err(error);
                    }
                    if !self.policy.is_retryable(&error) {
                        debug!(error = %error, "non-retryable error");
                        return Err(error);
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Retry `operation` under `policy` on the system clock.
pub async fn retry_with_backoff<F, Fut, T>(operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Retrier::new(policy.clone()).run(operation).await
}

/// Retry `operation` with the cloud-RPC classifier and default backoff.
pub async fn retry_rpc_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(operation, &RetryPolicy::rpc()).await
}
