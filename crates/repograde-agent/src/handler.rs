//! Message handlers for streamed agent output.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::AgentError;
use crate::types::AgentMessage;

/// Handler trait for streamed agent messages.
///
/// Implement this to turn the agent's output into your application's own
/// progress events. Messages arrive in the order the agent wrote them.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called for every message parsed from the agent's stdout.
    async fn on_message(&self, message: AgentMessage) -> Result<(), AgentError>;
}

/// A handler that forwards every message to a channel.
///
/// # Example
///
/// ```rust,no_run
/// use repograde_agent::ChannelHandler;
///
/// let (handler, mut rx) = ChannelHandler::new();
///
/// tokio::spawn(async move {
///     while let Some(msg) = rx.recv().await {
///         println!("Received: {}", msg.type_name());
///     }
/// });
/// ```
pub struct ChannelHandler {
    message_tx: mpsc::UnboundedSender<AgentMessage>,
}

impl ChannelHandler {
    /// Create a new handler with a message receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { message_tx: tx }, rx)
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn on_message(&self, message: AgentMessage) -> Result<(), AgentError> {
        trace!(message_type = message.type_name(), "Forwarding message");
        self.message_tx
            .send(message)
            .map_err(|_| AgentError::ProtocolError("message receiver dropped".to_string()))
    }
}
