//! Agent executor for running the agent CLI via subprocess.
//!
//! This module provides the main `AgentExecutor` type, which runs the CLI in
//! one-shot mode with streaming JSON output inside a working directory.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::handler::MessageHandler;
use crate::types::{AgentMessage, PermissionMode, Usage};

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Aborts the output reader tasks when dropped, so nothing reaches the
/// handler once `execute` has returned or been cancelled.
struct ReaderTasks(Vec<AbortHandle>);

impl Drop for ReaderTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Result of an agent execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// The session ID reported by the agent.
    pub session_id: Option<String>,

    /// The model reported by the agent, or the configured one.
    pub model_used: Option<String>,

    /// Wall-clock duration of execution in milliseconds.
    pub duration_ms: u64,

    /// Whether the agent reported an error result.
    pub is_error: bool,

    /// Final result text (the agent's answer).
    pub result_text: Option<String>,

    /// Token usage from the result message.
    pub usage: Option<Usage>,

    /// Number of messages parsed from stdout.
    pub message_count: u64,
}

/// Executor for the agent CLI.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use repograde_agent::{AgentExecutor, ChannelHandler, PermissionMode};
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let executor = AgentExecutor::new("claude")
///         .with_permission_mode(PermissionMode::Plan);
///
///     let (handler, mut rx) = ChannelHandler::new();
///
///     let result = executor.execute(
///         Path::new("."),
///         "Review this repository.",
///         Arc::new(handler),
///     ).await?;
///
///     println!("Answer: {:?}", result.result_text);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AgentExecutor {
    /// Path to the agent CLI executable.
    program: String,

    /// Permission mode to use.
    permission_mode: PermissionMode,

    /// Model to use (optional).
    model: Option<String>,

    /// Maximum agentic turns (optional).
    max_turns: Option<u32>,

    /// Text appended to the default system prompt (optional).
    system_prompt: Option<String>,

    /// Tools the agent may use without asking.
    allowed_tools: Vec<String>,
}

impl AgentExecutor {
    /// Create a new executor with the given path to the agent CLI.
    ///
    /// The path can be just "claude" to use PATH lookup, or a full path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            permission_mode: PermissionMode::Default,
            model: None,
            max_turns: None,
            system_prompt: None,
            allowed_tools: Vec::new(),
        }
    }

    /// Set the permission mode.
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Limit the number of agentic turns.
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Append text to the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Allow a tool without a permission prompt.
    pub fn with_allowed_tool(mut self, tool: impl Into<String>) -> Self {
        self.allowed_tools.push(tool.into());
        self
    }

    /// Path to the agent CLI.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command for one run. The child is killed when the returned
    /// command's child handle is dropped.
    fn build_command(&self, working_dir: &Path, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);

        cmd.arg("--output-format=stream-json").arg("--verbose");

        if self.permission_mode != PermissionMode::Default {
            cmd.arg("--permission-mode")
                .arg(self.permission_mode.to_string());
        }

        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }

        if let Some(turns) = self.max_turns {
            cmd.arg("--max-turns").arg(turns.to_string());
        }

        if let Some(system) = &self.system_prompt {
            cmd.arg("--append-system-prompt").arg(system);
        }

        if !self.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(self.allowed_tools.join(","));
        }

        // The prompt itself
        cmd.arg("--print").arg(prompt);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir)
            .kill_on_drop(true);

        cmd
    }

    /// Run a prompt inside `working_dir`.
    ///
    /// Every parsed stdout message is passed to `handler` in order. Returns
    /// once the process has exited and its output has been fully read.
    /// Dropping the returned future kills the agent process and stops
    /// reading its output.
    pub async fn execute(
        &self,
        working_dir: &Path,
        prompt: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ExecutionResult, AgentError> {
        info!(
            program = %self.program,
            working_dir = %working_dir.display(),
            prompt_len = prompt.len(),
            "Preparing agent execution"
        );

        let started = Instant::now();
        let mut cmd = self.build_command(working_dir, prompt);
        debug!("Full command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, "Failed to spawn agent process");
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::NotFound(self.program.clone())
            } else {
                AgentError::SpawnError(e)
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::ProtocolError("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::ProtocolError("Failed to get stderr".to_string()))?;

        // Keep the tail of stderr for error reports
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail = stderr_tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        warn!(stderr = %trimmed, "Agent stderr");
                        if let Ok(mut tail) = tail.lock() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(trimmed.to_string());
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error reading agent stderr");
                        break;
                    }
                }
            }
        });

        // Read stdout, forward messages, and capture the final result
        let stdout_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            let mut captured = ExecutionResult::default();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(total_messages = captured.message_count, "Agent stdout closed (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<AgentMessage>(trimmed) {
                            Ok(message) => {
                                captured.message_count += 1;
                                capture(&mut captured, &message);
                                if let Err(e) = handler.on_message(message).await {
                                    warn!(error = %e, "Handler error processing message");
                                }
                            }
                            Err(e) => {
                                let preview: String = trimmed.chars().take(200).collect();
                                warn!(error = %e, preview = %preview, "Failed to parse agent message");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error reading agent stdout");
                        break;
                    }
                }
            }
            captured
        });
        let _readers = ReaderTasks(vec![stdout_task.abort_handle(), stderr_task.abort_handle()]);

        let status = child.wait().await?;
        let mut result = stdout_task
            .await
            .map_err(|e| AgentError::ProtocolError(format!("stdout reader failed: {}", e)))?;
        let _ = stderr_task.await;

        let exit_code = status.code().unwrap_or(-1);
        info!(exit_code, success = status.success(), "Agent process exited");

        if !status.success() {
            let stderr = stderr_tail
                .lock()
                .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
                .unwrap_or_default();
            let stderr = if stderr.is_empty() {
                result.result_text.clone().unwrap_or_default()
            } else {
                stderr
            };
            return Err(AgentError::ProcessError {
                code: exit_code,
                stderr,
            });
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        if result.model_used.is_none() {
            result.model_used = self.model.clone();
        }
        Ok(result)
    }
}

impl Default for AgentExecutor {
    fn default() -> Self {
        Self::new("claude")
    }
}

/// Record session, model and result details from one message.
fn capture(result: &mut ExecutionResult, message: &AgentMessage) {
    match message {
        AgentMessage::System {
            session_id, model, ..
        } => {
            if session_id.is_some() {
                result.session_id = session_id.clone();
            }
            if model.is_some() {
                result.model_used = model.clone();
            }
        }
        AgentMessage::Result {
            is_error,
            result: text,
            usage,
            session_id,
            ..
        } => {
            result.is_error = is_error.unwrap_or(false);
            result.result_text = text.clone();
            result.usage = *usage;
            if session_id.is_some() {
                result.session_id = session_id.clone();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_builder() {
        let executor = AgentExecutor::new("claude")
            .with_model("claude-sonnet-4-20250514")
            .with_permission_mode(PermissionMode::Plan)
            .with_max_turns(30)
            .with_system_prompt("You are a strict grader.")
            .with_allowed_tool("Read")
            .with_allowed_tool("Grep");

        assert_eq!(executor.program, "claude");
        assert_eq!(executor.model, Some("claude-sonnet-4-20250514".to_string()));
        assert_eq!(executor.permission_mode, PermissionMode::Plan);
        assert_eq!(executor.max_turns, Some(30));
        assert_eq!(executor.allowed_tools, vec!["Read".to_string(), "Grep".to_string()]);
        assert_eq!(executor.system_prompt.as_deref(), Some("You are a strict grader."));
    }

    #[test]
    fn test_default_executor() {
        let executor = AgentExecutor::default();
        assert_eq!(executor.program(), "claude");
        assert_eq!(executor.permission_mode, PermissionMode::Default);
        assert!(executor.model.is_none());
    }

    #[test]
    fn test_command_arguments() {
        let executor = AgentExecutor::new("claude")
            .with_permission_mode(PermissionMode::Plan)
            .with_model("sonnet");
        let cmd = executor.build_command(Path::new("/tmp"), "grade it");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "--output-format=stream-json");
        assert!(args.windows(2).any(|w| w[0] == "--permission-mode" && w[1] == "plan"));
        assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "sonnet"));
        assert_eq!(&args[args.len() - 2..], &["--print", "grade it"]);
    }

    #[test]
    fn test_capture_result_message() {
        let mut result = ExecutionResult::default();
        let message: AgentMessage = serde_json::from_str(
            r#"{"type":"result","is_error":false,"result":"B+","session_id":"s1","usage":{"input_tokens":3,"output_tokens":4}}"#,
        )
        .unwrap();
        capture(&mut result, &message);

        assert_eq!(result.result_text.as_deref(), Some("B+"));
        assert_eq!(result.session_id.as_deref(), Some("s1"));
        assert_eq!(result.usage.unwrap().output_tokens, 4);
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let (handler, _rx) = crate::ChannelHandler::new();
        let executor = AgentExecutor::new("repograde-no-such-agent-binary");
        let err = executor
            .execute(Path::new("."), "hi", Arc::new(handler))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_streams_script_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-agent.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "echo '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s-1\",\"model\":\"m-1\"}'\n",
                "echo 'not json'\n",
                "echo '{\"type\":\"assistant\",\"message\":{\"role\":\"assistant\",\"content\":[{\"type\":\"text\",\"text\":\"Looks fine\"}]}}'\n",
                "echo '{\"type\":\"result\",\"is_error\":false,\"result\":\"Grade: A\",\"usage\":{\"input_tokens\":10,\"output_tokens\":5}}'\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (handler, mut rx) = crate::ChannelHandler::new();
        let executor = AgentExecutor::new(script.to_string_lossy().into_owned());
        let result = executor
            .execute(dir.path(), "grade", Arc::new(handler))
            .await
            .unwrap();

        assert_eq!(result.message_count, 3);
        assert_eq!(result.session_id.as_deref(), Some("s-1"));
        assert_eq!(result.model_used.as_deref(), Some("m-1"));
        assert_eq!(result.result_text.as_deref(), Some("Grade: A"));
        assert_eq!(result.usage.unwrap().input_tokens, 10);

        let mut types = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            types.push(msg.type_name());
        }
        assert_eq!(types, vec!["System", "Assistant", "Result"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_reports_nonzero_exit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("failing-agent.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'API rate limit exceeded' >&2\nexit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (handler, _rx) = crate::ChannelHandler::new();
        let executor = AgentExecutor::new(script.to_string_lossy().into_owned());
        let err = executor
            .execute(dir.path(), "grade", Arc::new(handler))
            .await
            .unwrap_err();

        match err {
            AgentError::ProcessError { code, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "API rate limit exceeded");
            }
            other => panic!("Expected ProcessError, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_execution_stops_forwarding() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-agent.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "(sleep 1; echo '{\"type\":\"result\",\"is_error\":false,\"result\":\"late\",\"usage\":{\"input_tokens\":10,\"output_tokens\":0}}') &\n",
                "sleep 30\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (handler, mut rx) = crate::ChannelHandler::new();
        let executor = AgentExecutor::new(script.to_string_lossy().into_owned());
        let run = tokio::time::timeout(
            Duration::from_millis(300),
            executor.execute(dir.path(), "grade", Arc::new(handler)),
        )
        .await;
        assert!(run.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.try_recv().is_err());
    }
}
