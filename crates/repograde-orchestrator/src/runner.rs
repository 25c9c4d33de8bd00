//! One repository's grading task.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use repograde_core::{ClonedRepo, GradeError, GradingOutcome, RepoStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::GradingBackend;
use crate::cancel::RepoHandle;
use crate::config::DEFAULT_GRADING_TIMEOUT;
use crate::events::EventSink;
use crate::retry::RateLimitedRetryExecutor;

/// Runs the grading call for one cloned repository under cancellation and a
/// time bound, and always settles with a [`GradingOutcome`].
///
/// The clone directory is removed once the call settles, whatever the
/// outcome.
#[derive(Clone)]
pub struct GradingTaskRunner {
    backend: Arc<dyn GradingBackend>,
    retry: RateLimitedRetryExecutor,
    timeout: Duration,
}

impl GradingTaskRunner {
    pub fn new(backend: Arc<dyn GradingBackend>) -> Self {
        Self {
            backend,
            retry: RateLimitedRetryExecutor::default(),
            timeout: DEFAULT_GRADING_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RateLimitedRetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        repo: ClonedRepo,
        prompt: &str,
        cancel: Arc<RepoHandle>,
        events: EventSink,
    ) -> GradingOutcome {
        let key = repo.key();

        if cancel.is_cancelled() {
            let reason = cancel.reason();
            info!(repo = %key, reason = %reason, "Cancelled before start");
            cancel.set_status(RepoStatus::Cancelled);
            remove_clone(repo.path()).await;
            return GradingOutcome::failed(repo.repo, &GradeError::Cancelled(reason), Duration::ZERO);
        }

        let started = Instant::now();
        info!(repo = %key, "Grading started");
        events.initializing(Some(format!("Grading {}", key)));

        let result = self.grade(&repo, prompt, &cancel, &events).await;
        let duration = started.elapsed();

        let outcome = match result {
            Ok(feedback) => {
                cancel.set_status(RepoStatus::Completed);
                info!(repo = %key, duration_ms = duration.as_millis() as u64, "Grading succeeded");
                GradingOutcome::succeeded(repo.repo.clone(), feedback, events.tokens_used(), duration)
            }
            Err(GradeError::Cancelled(reason)) => {
                cancel.set_status(RepoStatus::Cancelled);
                info!(repo = %key, reason = %reason, "Grading cancelled");
                GradingOutcome::failed(repo.repo.clone(), &GradeError::Cancelled(reason), duration)
                    .with_tokens(events.tokens_used())
            }
            Err(err) => {
                warn!(repo = %key, error = %err, "Grading failed");
                events.error(err.to_string());
                cancel.set_status(RepoStatus::Error);
                GradingOutcome::failed(repo.repo.clone(), &err, duration)
                    .with_tokens(events.tokens_used())
            }
        };

        remove_clone(repo.path()).await;
        outcome
    }

    async fn grade(
        &self,
        repo: &ClonedRepo,
        prompt: &str,
        cancel: &RepoHandle,
        events: &EventSink,
    ) -> Result<Option<String>, GradeError> {
        let backend = &self.backend;
        let path = repo.path();
        let call = self
            .retry
            .execute(move || backend.grade(path, prompt, events));

        tokio::select! {
            biased;
            _ = cancel.token().cancelled() => Err(GradeError::Cancelled(cancel.reason())),
            settled = tokio::time::timeout(self.timeout, call) => match settled {
                Err(_) => Err(GradeError::Timeout(self.timeout)),
                Ok(Err(err)) => Err(err.into_grade_error()),
                Ok(Ok(response)) if response.success => Ok(response.feedback),
                Ok(Ok(response)) => Err(GradeError::Grading(
                    response.error.unwrap_or_else(|| "Grading failed".to_string()),
                )),
            },
        }
    }
}

async fn remove_clone(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed clone directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove clone directory"),
    }
}
