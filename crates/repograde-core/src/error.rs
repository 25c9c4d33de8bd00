//! Core domain errors.

use std::time::Duration;

use thiserror::Error;

use crate::status::CancelReason;

/// Failure taxonomy for a batch. Every variant is isolated to one repository
/// (or one API call); none of them aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GradeError {
    /// URL rejected before cloning.
    #[error("Invalid GitHub URL: {0}")]
    InvalidUrl(String),

    /// Network or git failure; carries git's raw diagnostic.
    #[error("{message}")]
    Clone { url: String, message: String },

    /// The grading call did not settle within its time bound.
    #[error("Processing timeout ({})", format_bound(.0))]
    Timeout(Duration),

    /// User cancellation, global or per repository.
    #[error("{0}")]
    Cancelled(CancelReason),

    /// Any other failure reported by the grading call.
    #[error("{0}")]
    Grading(String),

    /// Rate-limit retry budget exhausted.
    #[error("Max retries exceeded for rate limit")]
    RateLimitExceeded,
}

fn format_bound(bound: &Duration) -> String {
    let secs = bound.as_secs();
    if bound.subsec_nanos() != 0 {
        return if secs == 0 {
            format!("{} ms", bound.as_millis())
        } else {
            format!("{:.1} seconds", bound.as_secs_f64())
        };
    }
    match secs {
        60 => "1 minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{} seconds", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = GradeError::Timeout(Duration::from_millis(600_000));
        assert_eq!(err.to_string(), "Processing timeout (10 minutes)");
        assert_eq!(
            GradeError::Timeout(Duration::from_secs(45)).to_string(),
            "Processing timeout (45 seconds)"
        );
        assert_eq!(
            GradeError::Timeout(Duration::from_secs(60)).to_string(),
            "Processing timeout (1 minute)"
        );
    }

    #[test]
    fn test_fractional_timeout_message() {
        assert_eq!(
            GradeError::Timeout(Duration::from_millis(300)).to_string(),
            "Processing timeout (300 ms)"
        );
        assert_eq!(
            GradeError::Timeout(Duration::from_millis(1500)).to_string(),
            "Processing timeout (1.5 seconds)"
        );
        assert_eq!(
            GradeError::Timeout(Duration::from_secs(1)).to_string(),
            "Processing timeout (1 second)"
        );
    }

    #[test]
    fn test_clone_error_is_raw_message() {
        let err = GradeError::Clone {
            url: "https://github.com/a/b".to_string(),
            message: "fatal: repository 'https://github.com/a/b/' not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "fatal: repository 'https://github.com/a/b/' not found"
        );
    }

    #[test]
    fn test_rate_limit_message() {
        assert_eq!(
            GradeError::RateLimitExceeded.to_string(),
            "Max retries exceeded for rate limit"
        );
        assert_eq!(GradeError::Cancelled(CancelReason::Skipped).to_string(), "Skipped by user");
    }
}
