//! Errors raised by external calls and their rate-limit classification.

use std::fmt;
use std::time::Duration;

use repograde_core::{GradeError, RateLimitState};
use thiserror::Error;

/// How a rate-limited failure should be waited out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    /// Quota exhausted; wait until `reset` (seconds since the Unix epoch).
    Primary { reset: i64 },
    /// Abuse or burst limit; back off exponentially unless the server
    /// named a delay.
    Secondary { retry_after: Option<Duration> },
}

/// Errors that can tell whether they were caused by a rate limit.
pub trait RateLimited {
    /// `None` means the error is not a rate limit and must not be retried.
    fn rate_limit_kind(&self) -> Option<RateLimitKind>;
}

/// Failure of a single external call (grading backend or GitHub API).
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP-like status, when the call had one.
    pub status: Option<u16>,
    pub message: String,
    pub rate_limit: RateLimitState,
    /// Server-provided `retry-after`, in seconds.
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitState) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    fn mentions_rate_limit(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        message.contains("rate limit")
            || message.contains("ratelimit")
            || message.contains("too many requests")
    }
}

impl RateLimited for ApiError {
    fn rate_limit_kind(&self) -> Option<RateLimitKind> {
        let limited = match self.status {
            Some(429) => true,
            Some(403) | None => self.mentions_rate_limit() || self.rate_limit.is_exhausted(),
            Some(_) => false,
        };
        if !limited {
            return None;
        }

        let secondary = self.message.to_ascii_lowercase().contains("secondary");
        let quota_spent = self.rate_limit.remaining.map_or(true, |r| r == 0);
        match self.rate_limit.reset {
            Some(reset) if !secondary && quota_spent && self.retry_after.is_none() => {
                Some(RateLimitKind::Primary { reset })
            }
            _ => Some(RateLimitKind::Secondary {
                retry_after: self.retry_after.map(Duration::from_secs),
            }),
        }
    }
}

/// Error returned by [`RateLimitedRetryExecutor`](crate::RateLimitedRetryExecutor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A retry budget ran out; `last` is the final rate-limit error.
    RateLimitExceeded { retries: u32, last: E },
    /// The call failed for a reason other than rate limiting.
    Call(E),
}

impl<E> RetryError<E> {
    /// The underlying call error, whichever way the retry loop ended.
    pub fn into_inner(self) -> E {
        match self {
            Self::RateLimitExceeded { last, .. } => last,
            Self::Call(err) => err,
        }
    }
}

impl<E: fmt::Display> RetryError<E> {
    /// Map onto the batch failure taxonomy.
    pub fn into_grade_error(self) -> GradeError {
        match self {
            Self::RateLimitExceeded { .. } => GradeError::RateLimitExceeded,
            Self::Call(err) => GradeError::Grading(err.to_string()),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitExceeded { .. } => write!(f, "Max retries exceeded for rate limit"),
            Self::Call(err) => write!(f, "{}", err),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RateLimitExceeded { last, .. } => Some(last),
            Self::Call(err) => Some(err),
        }
    }
}
