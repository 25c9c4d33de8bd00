//! Batch progress events and the per-repository event sink.

use std::sync::Arc;

use repograde_core::{GradingItem, GradingOutcome, RepoEvent, RepoKey, RepoRef, TokenUsage};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::cancel::RepoHandle;

/// Everything a caller can observe while a batch runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Emitted after each clone attempt, successful or not.
    CloneProgress {
        message: String,
        current: usize,
        total: usize,
    },
    /// A grading task was spawned for `repo`.
    RepoStarted { repo: RepoRef },
    /// A lifecycle event from one repository's grading task.
    Repo { key: RepoKey, event: RepoEvent },
    /// A grading task settled.
    RepoCompleted { outcome: GradingOutcome },
}

pub type EventSender = mpsc::UnboundedSender<BatchEvent>;

/// Unbounded channel for batch events.
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<BatchEvent>) {
    mpsc::unbounded_channel()
}

/// Tags [`RepoEvent`]s with their repository, keeps the repository's live
/// status and token tally current, and forwards the event to the batch
/// channel. A closed channel is ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    handle: Arc<RepoHandle>,
    tx: Option<EventSender>,
}

impl EventSink {
    pub fn new(handle: Arc<RepoHandle>, tx: Option<EventSender>) -> Self {
        Self { handle, tx }
    }

    pub fn key(&self) -> &RepoKey {
        self.handle.key()
    }

    /// Forward `event`. Events arriving after the repository settled are
    /// dropped.
    pub fn emit(&self, event: RepoEvent) {
        if !self.handle.advance(&event) {
            debug!(repo = %self.key(), event = event.kind(), "Dropping event for settled repo");
            return;
        }
        trace!(repo = %self.key(), event = event.kind(), "Repo event");
        if let RepoEvent::TurnCompleted { usage } = &event {
            self.handle.add_tokens(usage.total());
        }

        if let Some(tx) = &self.tx {
            let event = BatchEvent::Repo {
                key: self.key().clone(),
                event,
            };
            if tx.send(event).is_err() {
                debug!(repo = %self.key(), "Event receiver dropped");
            }
        }
    }

    pub fn initializing(&self, message: Option<String>) {
        self.emit(RepoEvent::Initializing { message });
    }

    pub fn item_updated(&self, item: GradingItem) {
        self.emit(RepoEvent::ItemUpdated { item });
    }

    pub fn item_completed(&self, item: GradingItem) {
        self.emit(RepoEvent::ItemCompleted { item });
    }

    pub fn turn_completed(&self, usage: TokenUsage) {
        self.emit(RepoEvent::TurnCompleted { usage });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(RepoEvent::Error {
            message: message.into(),
        });
    }

    /// Tokens reported through this sink so far.
    pub fn tokens_used(&self) -> Option<u64> {
        self.handle.tokens_used()
    }
}
