//! # backstop
//!
//! A small resilience layer for outbound calls to unreliable remote services:
//! retry with exponential backoff, and sliding-window rate limiting.
//!
//! ## Core Concepts
//!
//! - **Retrier**: wraps an opaque async operation and re-invokes it on
//!   transient failure, per a configurable [`RetryPolicy`]
//! - **RateLimiter**: a sliding-window admission gate consulted before a call
//!   is even attempted, independent of the retrier
//! - **Classifiers**: pluggable [`RetryClassifier`] implementations decide
//!   which failures are transient
//! - **Clocks**: both components read time through an injected [`Clock`], so
//!   tests run over virtual time
//!
//! The two components hold no shared state; compose them sequentially at the
//! call site, or stack them as Tower layers via [`RetryLayer`] and
//! [`RateLimitLayer`].
//!
//! ## Getting Started
//!
//! ```rust
//! use backstop::{retry_with_backoff, CallError, ErrorCode, RetryPolicy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> backstop::Result<()> {
//! let policy = RetryPolicy::default()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(10));
//!
//! let calls = AtomicUsize::new(0);
//! let value = retry_with_backoff(
//!     || {
//!         let n = calls.fetch_add(1, Ordering::SeqCst);
//!         async move {
//!             if n == 0 {
//!                 Err(CallError::service(ErrorCode::Unavailable, "warming up"))
//!             } else {
//!                 Ok(42)
//!             }
//!         }
//!     },
//!     &policy,
//! )
//! .await?;
//!
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod resilience;
pub mod retry;

// Public re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigBuilder, RateLimitConfig, ResilienceConfig, RetryConfig};
pub use error::{CallError, ErrorCode, Result};
pub use rate_limit::RateLimiter;
pub use resilience::{RateLimitLayer, RetryLayer};
pub use retry::{
    retry_rpc_operation, retry_with_backoff, DefaultClassifier, Retrier, RetryClassifier,
    RetryPolicy, RpcClassifier,
};

// Re-export Tower traits that layer users need
pub use tower::{Layer, Service, ServiceExt};
