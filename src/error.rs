//! Error types for the resilience crate.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CallError>;

/// Status marker attached to RPC-style failures.
///
/// The first five are the transient-infrastructure markers the retry
/// classifiers look at; the rest are permanent client-side conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unavailable,
    Internal,
    DeadlineExceeded,
    ResourceExhausted,
    Unknown,
    InvalidArgument,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    FailedPrecondition,
    Aborted,
}

impl ErrorCode {
    /// Wire-style name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
            ErrorCode::DeadlineExceeded => "deadline-exceeded",
            ErrorCode::ResourceExhausted => "resource-exhausted",
            ErrorCode::Unknown => "unknown",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::NotFound => "not-found",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure from a governed operation.
#[derive(Debug, Error)]
pub enum CallError {
    /// RPC-style failure carrying a status marker
    #[error("service error ({code}): {message}")]
    Service { code: ErrorCode, message: String },

    /// HTTP-style failure carrying a numeric status
    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },

    /// Admission denied by a rate limiter in fail-fast mode
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Caller-supplied input was rejected; never retryable
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// RPC-style failure with a status marker.
    pub fn service(code: ErrorCode, message: impl Into<String>) -> Self {
        CallError::Service {
            code,
            message: message.into(),
        }
    }

    /// HTTP-style failure with a numeric status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        CallError::Http {
            status,
            message: message.into(),
        }
    }

    /// Status marker, if this is an RPC-style failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CallError::Service { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Numeric status, if this is an HTTP-style failure.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CallError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
