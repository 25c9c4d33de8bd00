//! Lifecycle events streamed by a grading task.

use serde::{Deserialize, Serialize};

/// One moment in a grading task's lifecycle.
///
/// Within one repository the order is causal: `Initializing` precedes any
/// item event, and `TurnCompleted` is the last non-error event. There is no
/// ordering across repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepoEvent {
    /// The grading task has started.
    Initializing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A streamed item changed.
    ItemUpdated { item: GradingItem },
    /// A streamed item is final.
    ItemCompleted { item: GradingItem },
    /// The grading turn finished; carries token usage.
    TurnCompleted { usage: TokenUsage },
    /// The grading task failed.
    Error { message: String },
}

impl RepoEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initializing { .. } => "initializing",
            Self::ItemUpdated { .. } => "item_updated",
            Self::ItemCompleted { .. } => "item_completed",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::Error { .. } => "error",
        }
    }
}

/// Kind of a streamed grading item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Text addressed to the user.
    AgentMessage,
    /// Thinking/reasoning text.
    Reasoning,
    /// A tool invocation requested by the agent.
    ToolCall,
    /// The result of a tool invocation.
    ToolResult,
}

/// An item produced by the grading agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingItem {
    pub id: String,
    pub kind: ItemKind,
    pub text: String,
}

impl GradingItem {
    pub fn new(id: impl Into<String>, kind: ItemKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }
}

/// Token usage reported at the end of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Total tokens charged for the turn.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.cached_input_tokens + self.output_tokens
    }
}
