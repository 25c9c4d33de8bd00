//! Folding per-repo outcomes into a batch report.

use std::time::Duration;

use crate::outcome::{BatchResult, GradingOutcome};
use crate::repo::CloneFailure;

/// Pure fold of grading outcomes and clone failures into a [`BatchResult`].
pub struct ResultAggregator;

impl ResultAggregator {
    /// Count successes and failures and assemble the report.
    ///
    /// `elapsed` is the end-to-end wall-clock time measured by the caller;
    /// concurrent tasks overlap, so it is not the sum of per-repo durations.
    pub fn aggregate(
        results: &[GradingOutcome],
        clone_failures: &[CloneFailure],
        elapsed: Duration,
    ) -> BatchResult {
        let success_count = results.iter().filter(|r| r.success).count();
        BatchResult {
            results: results.to_vec(),
            clone_failures: clone_failures.to_vec(),
            total_duration_ms: elapsed.as_millis() as u64,
            success_count,
            failure_count: results.len() - success_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GradeError;
    use crate::repo::RepoRef;

    fn repo(name: &str) -> RepoRef {
        RepoRef::parse(&format!("https://github.com/octocat/{}", name)).unwrap()
    }

    #[test]
    fn test_aggregate_counts() {
        let results = vec![
            GradingOutcome::succeeded(repo("a"), None, Some(10), Duration::from_secs(1)),
            GradingOutcome::failed(
                repo("b"),
                &GradeError::Grading("boom".to_string()),
                Duration::from_secs(2),
            ),
            GradingOutcome::succeeded(repo("c"), None, None, Duration::from_secs(3)),
        ];
        let failures = vec![CloneFailure::for_url("not-a-url", "Invalid GitHub URL: not-a-url")];

        let batch = ResultAggregator::aggregate(&results, &failures, Duration::from_secs(4));

        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.failure_count, 1);
        assert_eq!(batch.success_count + batch.failure_count, batch.results.len());
        assert_eq!(batch.total_submitted(), 4);
        assert_eq!(batch.total_duration_ms, 4000);
        assert_eq!(batch.total_tokens(), 10);
        assert_eq!(batch.failures().count(), 1);
    }

    #[test]
    fn test_aggregate_empty() {
        let batch = ResultAggregator::aggregate(&[], &[], Duration::ZERO);
        assert_eq!(batch.success_count, 0);
        assert_eq!(batch.failure_count, 0);
        assert_eq!(batch.total_submitted(), 0);
    }

    #[test]
    fn test_aggregate_does_not_reorder_inputs() {
        let results = vec![
            GradingOutcome::succeeded(repo("z"), None, None, Duration::ZERO),
            GradingOutcome::succeeded(repo("a"), None, None, Duration::ZERO),
        ];
        let batch = ResultAggregator::aggregate(&results, &[], Duration::ZERO);
        assert_eq!(batch.results, results);
    }
}
