//! Grading task status and cancellation reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::RepoEvent;

/// Status of one repository's grading task.
///
/// `Pending -> Initializing -> (Streaming <-> Analyzing)* -> Completed | Error | Cancelled`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    /// Cloned and waiting for its grading task to start.
    #[default]
    Pending,
    /// Grading task started, no output yet.
    Initializing,
    /// An item is being streamed.
    Streaming,
    /// An item finished; the agent is working towards the next one.
    Analyzing,
    /// Grading finished successfully.
    Completed,
    /// Grading failed or timed out.
    Error,
    /// Grading was aborted, stopped or skipped.
    Cancelled,
}

impl RepoStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Status after observing `event`. Terminal states are sticky.
    pub fn advance(self, event: &RepoEvent) -> Self {
        if self.is_terminal() {
            return self;
        }
        match event {
            RepoEvent::Initializing { .. } => Self::Initializing,
            RepoEvent::ItemUpdated { .. } => Self::Streaming,
            RepoEvent::ItemCompleted { .. } | RepoEvent::TurnCompleted { .. } => Self::Analyzing,
            RepoEvent::Error { .. } => Self::Error,
        }
    }
}

/// Why a grading task was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Global abort of the whole batch.
    Aborted,
    /// The repository was stopped individually.
    Stopped,
    /// The repository was skipped individually.
    Skipped,
}

impl CancelReason {
    /// User-facing outcome message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Aborted => "Aborted by user",
            Self::Stopped => "Stopped by user",
            Self::Skipped => "Skipped by user",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{GradingItem, ItemKind, TokenUsage};

    #[test]
    fn test_status_transitions() {
        let item = GradingItem::new("1", ItemKind::AgentMessage, "hi");
        let status = RepoStatus::Pending
            .advance(&RepoEvent::Initializing { message: None })
            .advance(&RepoEvent::ItemUpdated { item: item.clone() });
        assert_eq!(status, RepoStatus::Streaming);

        let status = status.advance(&RepoEvent::ItemCompleted { item });
        assert_eq!(status, RepoStatus::Analyzing);

        let status = status.advance(&RepoEvent::TurnCompleted {
            usage: TokenUsage::default(),
        });
        assert_eq!(status, RepoStatus::Analyzing);
    }

    #[test]
    fn test_terminal_is_sticky() {
        let status = RepoStatus::Cancelled.advance(&RepoEvent::Initializing { message: None });
        assert_eq!(status, RepoStatus::Cancelled);
        assert!(status.is_terminal());
        assert!(!RepoStatus::Streaming.is_terminal());
    }

    #[test]
    fn test_cancel_reason_messages() {
        assert_eq!(CancelReason::Aborted.to_string(), "Aborted by user");
        assert_eq!(CancelReason::Skipped.to_string(), "Skipped by user");
        assert_eq!(CancelReason::Stopped.to_string(), "Stopped by user");
    }
}
