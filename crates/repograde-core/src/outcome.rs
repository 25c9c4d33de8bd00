//! Terminal results of grading tasks and of a whole batch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GradeError;
use crate::repo::{CloneFailure, RepoRef};

/// Terminal result of exactly one grading task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    pub repo_info: RepoRef,
    /// Wall-clock duration of the task in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl GradingOutcome {
    /// A successful grading.
    pub fn succeeded(
        repo_info: RepoRef,
        feedback: Option<String>,
        tokens_used: Option<u64>,
        duration: Duration,
    ) -> Self {
        Self {
            success: true,
            error: None,
            feedback,
            tokens_used,
            repo_info,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// A failed grading.
    pub fn failed(repo_info: RepoRef, error: &GradeError, duration: Duration) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            feedback: None,
            tokens_used: None,
            repo_info,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Attach token usage observed before the failure.
    pub fn with_tokens(mut self, tokens_used: Option<u64>) -> Self {
        self.tokens_used = tokens_used;
        self
    }
}

/// Aggregate report for a batch.
///
/// `results.len() + clone_failures.len()` equals the number of submitted
/// URLs, and `success_count + failure_count == results.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub results: Vec<GradingOutcome>,
    pub clone_failures: Vec<CloneFailure>,
    /// End-to-end duration of the grading phase in milliseconds.
    #[serde(rename = "totalDuration")]
    pub total_duration_ms: u64,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchResult {
    /// Number of URLs the batch accounted for.
    pub fn total_submitted(&self) -> usize {
        self.results.len() + self.clone_failures.len()
    }

    pub fn clone_failure_count(&self) -> usize {
        self.clone_failures.len()
    }

    /// Outcomes that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &GradingOutcome> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Sum of tokens across all outcomes that reported usage.
    pub fn total_tokens(&self) -> u64 {
        self.results.iter().filter_map(|r| r.tokens_used).sum()
    }
}
