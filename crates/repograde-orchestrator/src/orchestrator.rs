//! Batch orchestration: clone, grade in parallel, aggregate.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use repograde_core::{
    BatchId, BatchResult, CancelReason, CloneFailure, ClonedRepo, GradeError, GradingOutcome,
    RepoKey, RepoRef, RepoStatus, ResultAggregator,
};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::backend::GradingBackend;
use crate::cancel::CancellationRegistry;
use crate::cloner::RepoCloner;
use crate::config::OrchestratorConfig;
use crate::events::{BatchEvent, EventSender, EventSink};
use crate::retry::RateLimitedRetryExecutor;
use crate::runner::GradingTaskRunner;

/// Result of the cloning phase.
///
/// Every submitted URL lands in exactly one of the two lists, in submission
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloneResults {
    pub successful: Vec<ClonedRepo>,
    pub failed: Vec<CloneFailure>,
}

/// Drives one batch.
///
/// Call [`clone_repositories`](Self::clone_repositories), then
/// [`run_parallel_grading`](Self::run_parallel_grading), then
/// [`cleanup`](Self::cleanup). [`abort`](Self::abort),
/// [`stop_repo`](Self::stop_repo) and [`skip_repo`](Self::skip_repo) may be
/// called from anywhere at any time.
pub struct BatchOrchestrator {
    batch_id: BatchId,
    batch_dir: PathBuf,
    urls: Vec<String>,
    known: HashSet<RepoKey>,
    config: OrchestratorConfig,
    cloner: Arc<dyn RepoCloner>,
    runner: GradingTaskRunner,
    registry: Arc<CancellationRegistry>,
    cloned: Mutex<Option<CloneResults>>,
}

impl BatchOrchestrator {
    pub fn new(
        urls: Vec<String>,
        config: OrchestratorConfig,
        cloner: Arc<dyn RepoCloner>,
        backend: Arc<dyn GradingBackend>,
    ) -> Self {
        let batch_id = BatchId::generate();
        let batch_dir = config.work_root.join(batch_id.dir_name());
        let known = urls
            .iter()
            .filter_map(|url| RepoRef::parse(url).ok())
            .map(|repo| repo.key())
            .collect();
        let runner = GradingTaskRunner::new(backend)
            .with_timeout(config.grading_timeout)
            .with_retry(RateLimitedRetryExecutor::new(config.retry));

        info!(batch_id = %batch_id, repos = urls.len(), dir = %batch_dir.display(), "Batch created");

        Self {
            batch_id,
            batch_dir,
            urls,
            known,
            config,
            cloner,
            runner,
            registry: Arc::new(CancellationRegistry::new()),
            cloned: Mutex::new(None),
        }
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// `work_root/batch-<id>`; every clone of this batch lives below it.
    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Clone every submitted URL into the batch directory.
    ///
    /// Sends a [`BatchEvent::CloneProgress`] after each attempt. At most
    /// `clone_concurrency` clones run at once. After [`abort`](Self::abort)
    /// no new clone starts and in-flight clones are killed; the affected URLs
    /// are recorded as failures.
    pub async fn clone_repositories(&self, events: Option<&EventSender>) -> CloneResults {
        let total = self.urls.len();
        let limit = self.config.clone_concurrency.max(1);
        info!(batch_id = %self.batch_id, total, concurrency = limit, "Cloning repositories");

        let mut slots: Vec<Option<Result<ClonedRepo, CloneFailure>>> = vec![None; total];
        let mut seen = HashSet::new();
        let mut queue = self.urls.iter().enumerate();
        let mut in_flight = JoinSet::new();
        let mut completed = 0usize;

        loop {
            while in_flight.len() < limit {
                let Some((index, url)) = queue.next() else {
                    break;
                };
                match self.admit(url, &mut seen) {
                    Err(failure) => {
                        completed += 1;
                        report_clone(events, &Err(failure.clone()), completed, total);
                        slots[index] = Some(Err(failure));
                    }
                    Ok(repo) => {
                        let cloner = self.cloner.clone();
                        let dir = self.batch_dir.clone();
                        let global = self.registry.global().clone();
                        in_flight.spawn(async move {
                            let result = tokio::select! {
                                biased;
                                _ = global.cancelled() => {
                                    Err(CloneFailure::for_repo(&repo, CancelReason::Aborted.message()))
                                }
                                cloned = cloner.clone_repo(&repo, &dir) => {
                                    cloned.map_err(|e| CloneFailure::for_repo(&repo, e.to_string()))
                                }
                            };
                            (index, result)
                        });
                    }
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            completed += 1;
            match joined {
                Ok((index, result)) => {
                    report_clone(events, &result, completed, total);
                    slots[index] = Some(result);
                }
                Err(e) => error!(error = %e, "Clone task failed"),
            }
        }

        let mut results = CloneResults::default();
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(repo)) => results.successful.push(repo),
                Some(Err(failure)) => results.failed.push(failure),
                None => results
                    .failed
                    .push(CloneFailure::for_url(&self.urls[index], "Clone task failed")),
            }
        }

        self.settle_clone_failures(&results);

        info!(
            batch_id = %self.batch_id,
            cloned = results.successful.len(),
            failed = results.failed.len(),
            "Cloning finished"
        );
        *self.cloned.lock().await = Some(results.clone());
        results
    }

    /// Mark repositories that never got a clone as finished, so stop/skip
    /// report them as settled. A duplicate shares its key with the clone that
    /// succeeded and is left alone.
    fn settle_clone_failures(&self, results: &CloneResults) {
        let cloned: HashSet<RepoKey> = results.successful.iter().map(ClonedRepo::key).collect();
        for failure in &results.failed {
            let Some(key) = failure.key() else {
                continue;
            };
            if cloned.contains(&key) {
                continue;
            }
            let status = if failure.error == CancelReason::Aborted.message() {
                RepoStatus::Cancelled
            } else {
                RepoStatus::Error
            };
            self.registry.register(&key).set_status(status);
        }
    }

    /// Decide whether `url` gets a clone attempt.
    fn admit(&self, url: &str, seen: &mut HashSet<RepoKey>) -> Result<RepoRef, CloneFailure> {
        let repo = RepoRef::parse(url).map_err(|e| CloneFailure::for_url(url, e.to_string()))?;
        if self.registry.is_aborted() {
            return Err(CloneFailure::for_repo(&repo, CancelReason::Aborted.message()));
        }
        if !seen.insert(repo.key()) {
            return Err(CloneFailure::for_repo(
                &repo,
                format!("Duplicate repository: {}", repo.key()),
            ));
        }
        Ok(repo)
    }

    /// Grade every successfully cloned repository concurrently and aggregate.
    ///
    /// Clones first if [`clone_repositories`](Self::clone_repositories) has
    /// not run. Never fails: every repository settles with an outcome. The
    /// reported total duration covers grading only.
    pub async fn run_parallel_grading(
        &self,
        prompt: &str,
        events: Option<&EventSender>,
    ) -> BatchResult {
        let cloned = self.cloned.lock().await.clone();
        let clones = match cloned {
            Some(clones) => clones,
            None => self.clone_repositories(events).await,
        };
        let started = Instant::now();

        info!(
            batch_id = %self.batch_id,
            repos = clones.successful.len(),
            concurrency = ?self.config.grading_concurrency,
            "Starting parallel grading"
        );

        let prompt: Arc<str> = Arc::from(prompt);
        let semaphore = self
            .config
            .grading_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        // Register every repository before any task runs so that stop/skip
        // issued during fan-out is never lost.
        let handles: Vec<_> = clones
            .successful
            .iter()
            .map(|repo| self.registry.register(&repo.key()))
            .collect();

        let mut tasks = Vec::with_capacity(handles.len());
        for (repo, handle) in clones.successful.into_iter().zip(handles) {
            let runner = self.runner.clone();
            let prompt = prompt.clone();
            let tx = events.cloned();
            let semaphore = semaphore.clone();
            let repo_info = repo.repo.clone();
            let path = repo.local_path.clone();

            let task = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = handle.token().cancelled() => None,
                    },
                    None => None,
                };

                if let Some(tx) = &tx {
                    let _ = tx.send(BatchEvent::RepoStarted {
                        repo: repo.repo.clone(),
                    });
                }
                let sink = EventSink::new(handle.clone(), tx.clone());
                let outcome = runner.run(repo, &prompt, handle, sink).await;
                if let Some(tx) = &tx {
                    let _ = tx.send(BatchEvent::RepoCompleted {
                        outcome: outcome.clone(),
                    });
                }
                outcome
            });
            tasks.push((repo_info, path, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (repo_info, path, task) in tasks {
            match task.await {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    error!(repo = %repo_info.key(), error = %e, "Grading task failed");
                    if let Some(handle) = self.registry.get(&repo_info.key()) {
                        handle.set_status(RepoStatus::Error);
                    }
                    if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                        if e.kind() != ErrorKind::NotFound {
                            warn!(path = %path.display(), error = %e, "Failed to remove clone directory");
                        }
                    }
                    let err = GradeError::Grading(format!("Grading task failed: {}", e));
                    results.push(GradingOutcome::failed(repo_info, &err, Duration::ZERO));
                }
            }
        }

        let batch = ResultAggregator::aggregate(&results, &clones.failed, started.elapsed());
        info!(
            batch_id = %self.batch_id,
            succeeded = batch.success_count,
            failed = batch.failure_count,
            clone_failures = batch.clone_failure_count(),
            duration_ms = batch.total_duration_ms,
            "Batch complete"
        );
        batch
    }

    /// Cancel every repository, pending or in flight.
    pub fn abort(&self) {
        self.registry.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.registry.is_aborted()
    }

    /// Stop one repository. Returns false if it is not part of this batch or
    /// has already finished.
    pub fn stop_repo(&self, owner: &str, repo: &str) -> bool {
        self.signal(owner, repo, CancelReason::Stopped)
    }

    /// Skip one repository. Returns false if it is not part of this batch or
    /// has already finished.
    pub fn skip_repo(&self, owner: &str, repo: &str) -> bool {
        self.signal(owner, repo, CancelReason::Skipped)
    }

    fn signal(&self, owner: &str, repo: &str, reason: CancelReason) -> bool {
        let key = RepoKey::new(owner, repo);
        if !self.known.contains(&key) {
            warn!(repo = %key, "Cannot cancel unknown repository");
            return false;
        }
        if self.registry.status(&key).is_some_and(|s| s.is_terminal()) {
            return false;
        }
        self.registry.signal(&key, reason);
        true
    }

    /// Live status of one repository; `None` if it is not part of this batch.
    pub fn repo_status(&self, owner: &str, repo: &str) -> Option<RepoStatus> {
        let key = RepoKey::new(owner, repo);
        if !self.known.contains(&key) {
            return None;
        }
        Some(self.registry.status(&key).unwrap_or_default())
    }

    /// Remove the batch directory. Safe to call more than once.
    pub async fn cleanup(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.batch_dir).await {
            Ok(()) => {
                info!(dir = %self.batch_dir.display(), "Removed batch directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn report_clone(
    events: Option<&EventSender>,
    result: &Result<ClonedRepo, CloneFailure>,
    current: usize,
    total: usize,
) {
    let message = match result {
        Ok(repo) => format!("Cloned {}", repo.key()),
        Err(failure) => {
            warn!(url = %failure.url, error = %failure.error, "Clone failed");
            format!("Failed to clone {}: {}", failure.url, failure.error)
        }
    };
    info!(current, total, "{}", message);
    if let Some(tx) = events {
        let _ = tx.send(BatchEvent::CloneProgress {
            message,
            current,
            total,
        });
    }
}
