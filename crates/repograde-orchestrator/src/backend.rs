//! Grading backends.
//!
//! A backend receives a cloned repository and a prompt, reports progress
//! through an [`EventSink`], and settles with a [`GradingResponse`]. The
//! default backend runs a coding agent CLI inside the clone.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use repograde_agent::{AgentError, AgentExecutor, AgentMessage, ContentItem, MessageHandler};
use repograde_core::{GradingItem, ItemKind, TokenUsage};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::events::EventSink;

/// Longest tool output forwarded in an item event.
const TOOL_RESULT_PREVIEW_CHARS: usize = 500;

/// What a grading call settled with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradingResponse {
    pub success: bool,
    pub feedback: Option<String>,
    pub error: Option<String>,
}

impl GradingResponse {
    pub fn success(feedback: impl Into<String>) -> Self {
        Self {
            success: true,
            feedback: Some(feedback.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            feedback: None,
            error: Some(error.into()),
        }
    }
}

/// The AI grading capability.
///
/// Errors that are rate limits (see [`RateLimited`](crate::RateLimited)) are
/// retried by the caller; the backend must be safe to call again.
#[async_trait]
pub trait GradingBackend: Send + Sync {
    async fn grade(
        &self,
        repo_path: &Path,
        prompt: &str,
        events: &EventSink,
    ) -> Result<GradingResponse, ApiError>;
}

/// Grades by running a coding agent CLI in the cloned repository.
#[derive(Debug, Clone)]
pub struct AgentGrader {
    executor: AgentExecutor,
}

impl AgentGrader {
    pub fn new(executor: AgentExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl GradingBackend for AgentGrader {
    async fn grade(
        &self,
        repo_path: &Path,
        prompt: &str,
        events: &EventSink,
    ) -> Result<GradingResponse, ApiError> {
        info!(
            repo = %events.key(),
            program = %self.executor.program(),
            "Starting agent grading"
        );

        let handler = Arc::new(EventForwarder::new(events.clone()));
        let result = self
            .executor
            .execute(repo_path, prompt, handler)
            .await
            .map_err(agent_error_to_api)?;

        if result.is_error {
            let message = result
                .result_text
                .unwrap_or_else(|| "Agent reported an error".to_string());
            return Err(ApiError::new(message));
        }

        info!(
            repo = %events.key(),
            model = ?result.model_used,
            duration_ms = result.duration_ms,
            messages = result.message_count,
            "Agent grading completed"
        );

        match result.result_text {
            Some(feedback) if !feedback.trim().is_empty() => Ok(GradingResponse::success(feedback)),
            _ => Ok(GradingResponse::failure("Agent returned no feedback")),
        }
    }
}

fn agent_error_to_api(err: AgentError) -> ApiError {
    match err {
        AgentError::ProcessError { code, stderr } => {
            let message = if stderr.is_empty() {
                format!("Agent process exited with code {}", code)
            } else {
                stderr
            };
            ApiError::new(message)
        }
        other => ApiError::new(other.to_string()),
    }
}

/// Maps agent output onto repository events.
struct EventForwarder {
    events: EventSink,
}

impl EventForwarder {
    fn new(events: EventSink) -> Self {
        Self { events }
    }
}

#[async_trait]
impl MessageHandler for EventForwarder {
    async fn on_message(&self, message: AgentMessage) -> Result<(), AgentError> {
        match message {
            AgentMessage::System { session_id, model, .. } => {
                debug!(repo = %self.events.key(), session_id = ?session_id, model = ?model, "Agent session started");
            }
            AgentMessage::Assistant { message, .. } => {
                let message_id = message.id.unwrap_or_default();
                for (index, content) in message.content.into_iter().enumerate() {
                    let item_id = format!("{}:{}", message_id, index);
                    match content {
                        ContentItem::Text { text } => {
                            self.events
                                .item_completed(GradingItem::new(item_id, ItemKind::AgentMessage, text));
                        }
                        ContentItem::Thinking { thinking } => {
                            self.events
                                .item_completed(GradingItem::new(item_id, ItemKind::Reasoning, thinking));
                        }
                        ContentItem::ToolUse { id, name, input } => {
                            let summary = ContentItem::tool_summary(&name, &input);
                            self.events
                                .item_updated(GradingItem::new(id, ItemKind::ToolCall, summary));
                        }
                        ContentItem::ToolResult { .. } | ContentItem::Other => {}
                    }
                }
            }
            AgentMessage::User { message, .. } => {
                for content in message.content {
                    if let ContentItem::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = content
                    {
                        let preview = preview_text(&content);
                        self.events
                            .item_completed(GradingItem::new(tool_use_id, ItemKind::ToolResult, preview));
                    }
                }
            }
            AgentMessage::Result {
                is_error, usage, ..
            } => {
                if is_error == Some(true) {
                    // Reported through the call's result instead.
                    return Ok(());
                }
                let usage = usage.unwrap_or_default();
                self.events.turn_completed(TokenUsage {
                    input_tokens: usage.input_tokens + usage.cache_creation_input_tokens,
                    cached_input_tokens: usage.cache_read_input_tokens,
                    output_tokens: usage.output_tokens,
                });
            }
            AgentMessage::Unknown(value) => {
                let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("?");
                warn!(repo = %self.events.key(), message_type = %kind, "Ignoring unknown agent message");
            }
        }
        Ok(())
    }
}

fn preview_text(content: &Value) -> String {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    text.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationRegistry;
    use crate::error::{RateLimitKind, RateLimited};
    use crate::events::{channel, BatchEvent};
    use repograde_core::{RepoEvent, RepoKey, RepoStatus};

    fn sink() -> (
        EventSink,
        tokio::sync::mpsc::UnboundedReceiver<BatchEvent>,
        Arc<crate::cancel::RepoHandle>,
    ) {
        let registry = CancellationRegistry::new();
        let handle = registry.register(&RepoKey::new("acme", "widgets"));
        let (tx, rx) = channel();
        (EventSink::new(handle.clone(), Some(tx)), rx, handle)
    }

    fn repo_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<BatchEvent>) -> Vec<RepoEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BatchEvent::Repo { event, .. } = event {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_forwarder_maps_agent_output() {
        let (sink, mut rx, handle) = sink();
        let forwarder = EventForwarder::new(sink);

        let lines = [
            r#"{"type":"assistant","message":{"id":"m1","role":"assistant","content":[{"type":"text","text":"Reading the code"},{"type":"tool_use","id":"tu_1","name":"Read","input":{"file_path":"README.md"}}]}}"#,
            r##"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"tu_1","content":"# Widgets"}]}}"##,
            r#"{"type":"result","subtype":"success","is_error":false,"result":"Grade: A","usage":{"input_tokens":100,"output_tokens":40,"cache_read_input_tokens":10}}"#,
        ];
        for line in lines {
            let message: AgentMessage = serde_json::from_str(line).unwrap();
            forwarder.on_message(message).await.unwrap();
        }

        let events = repo_events(&mut rx);
        assert_eq!(events.len(), 4);
        match &events[0] {
            RepoEvent::ItemCompleted { item } => {
                assert_eq!(item.kind, ItemKind::AgentMessage);
                assert_eq!(item.text, "Reading the code");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &events[1] {
            RepoEvent::ItemUpdated { item } => {
                assert_eq!(item.kind, ItemKind::ToolCall);
                assert_eq!(item.text, "Read README.md");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &events[2] {
            RepoEvent::ItemCompleted { item } => {
                assert_eq!(item.id, "tu_1");
                assert_eq!(item.kind, ItemKind::ToolResult);
                assert_eq!(item.text, "# Widgets");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(events[3], RepoEvent::TurnCompleted { .. }));
        assert_eq!(handle.tokens_used(), Some(150));
        assert_eq!(handle.status(), RepoStatus::Analyzing);
    }

    #[test]
    fn test_preview_text() {
        let array = serde_json::json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]);
        assert_eq!(preview_text(&array), "a\nb");
        let long = Value::String("x".repeat(2000));
        assert_eq!(preview_text(&long).len(), TOOL_RESULT_PREVIEW_CHARS);
    }

    #[test]
    fn test_agent_rate_limit_is_retryable() {
        let err = agent_error_to_api(AgentError::ProcessError {
            code: 1,
            stderr: "Error: API rate limit exceeded".to_string(),
        });
        assert_eq!(
            err.rate_limit_kind(),
            Some(RateLimitKind::Secondary { retry_after: None })
        );

        let err = agent_error_to_api(AgentError::NotFound("claude".to_string()));
        assert_eq!(err.rate_limit_kind(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_agent_grader_with_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-agent");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "echo '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}'\n",
                "echo '{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"result\":\"Solid work\",\"usage\":{\"input_tokens\":7,\"output_tokens\":3}}'\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let grader = AgentGrader::new(AgentExecutor::new(script.to_string_lossy()));
        let (sink, _rx, handle) = sink();
        let response = grader.grade(dir.path(), "Grade it", &sink).await.unwrap();

        assert_eq!(response, GradingResponse::success("Solid work"));
        assert_eq!(handle.tokens_used(), Some(10));
    }
}
