//! Agent CLI SDK for repograde
//!
//! This crate runs a coding agent CLI as a subprocess in one-shot mode and
//! streams its line-delimited JSON output to a handler. It knows nothing about
//! grading or batches; the orchestrator maps its messages to repo events.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use repograde_agent::{AgentExecutor, ChannelHandler, PermissionMode};
//!
//! async fn run_agent() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = AgentExecutor::new("claude")
//!         .with_permission_mode(PermissionMode::Plan);
//!
//!     let (handler, mut rx) = ChannelHandler::new();
//!
//!     let result = executor.execute(
//!         Path::new("."),
//!         "Summarize this repository.",
//!         Arc::new(handler),
//!     ).await?;
//!
//!     println!("Session ID: {:?}", result.session_id);
//!     Ok(())
//! }
//! ```

mod error;
mod executor;
mod handler;
mod types;

// Re-export main types
pub use error::AgentError;
pub use executor::{AgentExecutor, ExecutionResult};
pub use handler::{ChannelHandler, MessageHandler};
pub use types::{AgentMessage, AssistantMessage, ContentItem, PermissionMode, Usage, UserMessage};
