//! repograde batch orchestrator
//!
//! Clones a batch of GitHub repositories, grades each one concurrently with
//! per-repository cancellation, a time bound and rate-limit retries, and
//! folds the outcomes into a single [`BatchResult`](repograde_core::BatchResult).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use repograde_agent::AgentExecutor;
//! use repograde_orchestrator::{
//!     channel, AgentGrader, BatchOrchestrator, GitCloner, OrchestratorConfig,
//! };
//!
//! async fn grade_batch(urls: Vec<String>) {
//!     let config = OrchestratorConfig::default();
//!     let cloner = Arc::new(GitCloner::new().with_timeout(config.clone_timeout));
//!     let backend = Arc::new(AgentGrader::new(AgentExecutor::new("claude")));
//!     let batch = BatchOrchestrator::new(urls, config, cloner, backend);
//!
//!     let (tx, _rx) = channel();
//!     batch.clone_repositories(Some(&tx)).await;
//!     let result = batch.run_parallel_grading("Grade this project.", Some(&tx)).await;
//!     println!("{} of {} graded", result.success_count, result.total_submitted());
//!     let _ = batch.cleanup().await;
//! }
//! ```

mod backend;
mod cancel;
mod cloner;
mod config;
mod error;
mod events;
mod github;
mod orchestrator;
mod retry;
mod runner;

pub use backend::{AgentGrader, GradingBackend, GradingResponse};
pub use cancel::{CancellationRegistry, RepoHandle};
pub use cloner::{clone_url, GitCloner, RepoCloner};
pub use config::{OrchestratorConfig, RetryPolicy, DEFAULT_CLONE_TIMEOUT, DEFAULT_GRADING_TIMEOUT};
pub use error::{ApiError, RateLimitKind, RateLimited, RetryError};
pub use events::{channel, BatchEvent, EventSender, EventSink};
pub use github::{CreatedIssue, GithubClient, DEFAULT_API_BASE};
pub use orchestrator::{BatchOrchestrator, CloneResults};
pub use retry::{primary_wait, RateLimitedRetryExecutor};
pub use runner::GradingTaskRunner;
