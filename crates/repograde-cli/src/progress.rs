//! Human-readable progress output.

use repograde_core::{BatchResult, ItemKind, RepoEvent};
use repograde_orchestrator::BatchEvent;
use tokio::sync::mpsc;

/// Print events until every sender is dropped.
pub async fn print_events(mut rx: mpsc::UnboundedReceiver<BatchEvent>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = format_event(&event, verbose) {
            println!("{}", line);
        }
    }
}

/// One display line for `event`, or `None` if it is too chatty to show.
pub fn format_event(event: &BatchEvent, verbose: bool) -> Option<String> {
    match event {
        BatchEvent::CloneProgress {
            message,
            current,
            total,
        } => Some(format!("[{}/{}] {}", current, total, message)),
        BatchEvent::RepoStarted { repo } => Some(format!("-> {} grading", repo.key())),
        BatchEvent::Repo { key, event } => match event {
            RepoEvent::ItemUpdated { item } if item.kind == ItemKind::ToolCall && verbose => {
                Some(format!("   {} | {}", key, item.text))
            }
            RepoEvent::ItemCompleted { item } if item.kind == ItemKind::AgentMessage && verbose => {
                Some(format!("   {} | {}", key, first_line(&item.text)))
            }
            RepoEvent::TurnCompleted { usage } => {
                Some(format!("   {} | {} tokens", key, usage.total()))
            }
            _ => None,
        },
        BatchEvent::RepoCompleted { outcome } => {
            let key = outcome.repo_info.key();
            let secs = outcome.duration_ms as f64 / 1000.0;
            Some(match &outcome.error {
                None => format!("ok {} ({:.1}s)", key, secs),
                Some(error) => format!("FAILED {} ({:.1}s): {}", key, secs, error),
            })
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Final summary block.
pub fn format_summary(result: &BatchResult) -> String {
    let mut out = format!(
        "\nGraded {} of {} repositories in {:.1}s: {} succeeded, {} failed, {} not cloned",
        result.results.len(),
        result.total_submitted(),
        result.total_duration_ms as f64 / 1000.0,
        result.success_count,
        result.failure_count,
        result.clone_failure_count(),
    );
    let tokens = result.total_tokens();
    if tokens > 0 {
        out.push_str(&format!("\nTokens used: {}", tokens));
    }
    for failure in &result.clone_failures {
        out.push_str(&format!("\n  clone failed  {}: {}", failure.url, failure.error));
    }
    for outcome in result.failures() {
        out.push_str(&format!(
            "\n  grade failed  {}: {}",
            outcome.repo_info.key(),
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use repograde_core::{
        CloneFailure, GradeError, GradingItem, GradingOutcome, RepoRef, ResultAggregator,
        TokenUsage,
    };
    use std::time::Duration;

    fn repo() -> RepoRef {
        RepoRef::parse("https://github.com/acme/widgets").unwrap()
    }

    #[test]
    fn test_format_clone_progress() {
        let event = BatchEvent::CloneProgress {
            message: "Cloned acme/widgets".to_string(),
            current: 2,
            total: 5,
        };
        assert_eq!(format_event(&event, false).unwrap(), "[2/5] Cloned acme/widgets");
    }

    #[test]
    fn test_items_only_shown_when_verbose() {
        let event = BatchEvent::Repo {
            key: repo().key(),
            event: RepoEvent::ItemUpdated {
                item: GradingItem::new("tu_1", ItemKind::ToolCall, "Read README.md"),
            },
        };
        assert!(format_event(&event, false).is_none());
        assert_eq!(
            format_event(&event, true).unwrap(),
            "   acme/widgets | Read README.md"
        );

        let usage = BatchEvent::Repo {
            key: repo().key(),
            event: RepoEvent::TurnCompleted {
                usage: TokenUsage {
                    input_tokens: 10,
                    cached_input_tokens: 0,
                    output_tokens: 2,
                },
            },
        };
        assert_eq!(format_event(&usage, false).unwrap(), "   acme/widgets | 12 tokens");
    }

    #[test]
    fn test_format_completion() {
        let ok = BatchEvent::RepoCompleted {
            outcome: GradingOutcome::succeeded(repo(), None, None, Duration::from_millis(1500)),
        };
        assert_eq!(format_event(&ok, false).unwrap(), "ok acme/widgets (1.5s)");

        let failed = BatchEvent::RepoCompleted {
            outcome: GradingOutcome::failed(repo(), &GradeError::RateLimitExceeded, Duration::ZERO),
        };
        assert_eq!(
            format_event(&failed, false).unwrap(),
            "FAILED acme/widgets (0.0s): Max retries exceeded for rate limit"
        );
    }

    #[test]
    fn test_summary_lists_failures() {
        let results = vec![GradingOutcome::failed(
            repo(),
            &GradeError::Grading("boom".to_string()),
            Duration::from_secs(1),
        )];
        let failures = vec![CloneFailure::for_url("bogus", "Invalid GitHub URL: bogus")];
        let batch = ResultAggregator::aggregate(&results, &failures, Duration::from_secs(3));

        let summary = format_summary(&batch);
        assert!(summary.contains("Graded 1 of 2 repositories in 3.0s"));
        assert!(summary.contains("clone failed  bogus: Invalid GitHub URL: bogus"));
        assert!(summary.contains("grade failed  acme/widgets: boom"));
    }
}
