//! Tower middleware for the retry and rate-limit policies.
//!
//! The policies are plain utilities; these layers are the composable face for
//! callers that stack middleware:
//!
//! ```text
//! ServiceBuilder::new()
//!     .layer(RateLimitLayer::new(limiter))
//!     .layer(RetryLayer::new(policy))
//!     .service(outbound_call)
//! ```
//!
//! There is deliberately no timeout layer here: an individual operation gets
//! no deadline, and a hung operation hangs the retry loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Mutex;
use tower::{Layer, Service, ServiceExt};
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::error::CallError;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

// ===== Retry =====

/// Applies a [`RetryPolicy`] to an inner service.
pub struct RetryLayer {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }
}

pub struct Retry<S> {
    inner: Arc<Mutex<S>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner: Arc::new(Mutex::new(inner)),
            policy: self.policy.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Retry<S>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = CallError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let policy = self.policy.clone();
        let clock = self.clock.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut attempt: u32 = 1;
            loop {
                let result = {
                    let mut guard = inner.lock().await;
                    ServiceExt::ready(&mut *guard).await?.call(req.clone()).await
                };
                match result {
                    Ok(resp) => return Ok(resp),
                    Err(error) => {
                        if attempt >= policy.attempts() || !policy.is_retryable(&error) {
                            return Err(error);
                        }
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "request failed, backing off"
                        );
                        clock.sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        })
    }
}

// ===== Rate limit =====

/// Gates an inner service behind a shared [`RateLimiter`].
///
/// In auto-throttle mode (the default) a throttled call waits for a slot; in
/// fail-fast mode it returns [`CallError::RateLimited`] without invoking the
/// inner service.
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    auto_throttle: bool,
    clock: Arc<dyn Clock>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            auto_throttle: true,
            clock: Arc::new(SystemClock),
        }
    }

    /// Fail with [`CallError::RateLimited`] instead of waiting when throttled.
    pub fn fail_fast(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            auto_throttle: false,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct RateLimit<S> {
    inner: Arc<Mutex<S>>,
    limiter: Arc<RateLimiter>,
    auto_throttle: bool,
    clock: Arc<dyn Clock>,
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner: Arc::new(Mutex::new(inner)),
            limiter: self.limiter.clone(),
            auto_throttle: self.auto_throttle,
            clock: self.clock.clone(),
        }
    }
}

impl<S, Req> Service<Req> for RateLimit<S>
where
    Req: Send + 'static,
    S: Service<Req, Error = CallError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let auto_throttle = self.auto_throttle;
        let clock = self.clock.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            // The inner service is not touched until a slot is granted;
            // call-time work in the inner `call` stays behind the gate.
            while !limiter.try_acquire() {
                let retry_after = limiter.time_until_ready();
                if !auto_throttle {
                    warn!(
                        retry_after_ms = retry_after.as_millis() as u64,
                        "rate limit exceeded"
                    );
                    return Err(CallError::RateLimited { retry_after });
                }
                clock.sleep(retry_after).await;
            }
            let mut guard = inner.lock().await;
            ServiceExt::ready(&mut *guard).await?.call(req).await
        })
    }
}
