//! repograde Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Subprocesses (git, the grading agent)
//! - Network clients
//! - The filesystem
//!
//! All types here describe one batch: the repositories submitted, what
//! happened to each of them, and the final report.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod ids;
pub mod outcome;
pub mod rate_limit;
pub mod repo;
pub mod status;

// Re-export commonly used types
pub use aggregate::ResultAggregator;
pub use error::GradeError;
pub use event::{GradingItem, ItemKind, RepoEvent, TokenUsage};
pub use ids::{BatchId, RepoKey};
pub use outcome::{BatchResult, GradingOutcome};
pub use rate_limit::RateLimitState;
pub use repo::{CloneFailure, ClonedRepo, RepoRef};
pub use status::{CancelReason, RepoStatus};
