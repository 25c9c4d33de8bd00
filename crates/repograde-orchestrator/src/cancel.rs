//! Cancellation tokens and live status, per repository.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use repograde_core::{CancelReason, RepoEvent, RepoKey, RepoStatus};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Live state of one repository in a batch.
///
/// The token is a child of the batch token, so a global abort reaches every
/// repository while a per-repository signal reaches only its own.
#[derive(Debug)]
pub struct RepoHandle {
    key: RepoKey,
    global: CancellationToken,
    token: CancellationToken,
    reason: Mutex<Option<CancelReason>>,
    status: Mutex<RepoStatus>,
    tokens_used: Mutex<Option<u64>>,
}

impl RepoHandle {
    fn new(key: RepoKey, global: &CancellationToken) -> Self {
        Self {
            key,
            global: global.clone(),
            token: global.child_token(),
            reason: Mutex::new(None),
            status: Mutex::new(RepoStatus::Pending),
            tokens_used: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel this repository only. The first reason recorded wins.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert(reason);
        }
        self.token.cancel();
    }

    /// Why the token fired. A global abort takes precedence over a
    /// per-repository signal.
    pub fn reason(&self) -> CancelReason {
        if self.global.is_cancelled() {
            return CancelReason::Aborted;
        }
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(CancelReason::Stopped)
    }

    pub fn status(&self) -> RepoStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: RepoStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Advance the status past `event`. Returns false, leaving the status
    /// alone, once the repository has reached a terminal state.
    pub fn advance(&self, event: &RepoEvent) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_terminal() {
            return false;
        }
        *status = status.advance(event);
        true
    }

    /// Tokens reported so far, if the backend reported any.
    pub fn tokens_used(&self) -> Option<u64> {
        *self.tokens_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_tokens(&self, tokens: u64) {
        let mut used = self.tokens_used.lock().unwrap_or_else(PoisonError::into_inner);
        *used = Some(used.unwrap_or(0) + tokens);
    }
}

/// Batch-wide cancellation registry.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    global: CancellationToken,
    repos: RwLock<HashMap<RepoKey, Arc<RepoHandle>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by [`abort`](Self::abort).
    pub fn global(&self) -> &CancellationToken {
        &self.global
    }

    /// Cancel every repository, including ones not registered yet.
    pub fn abort(&self) {
        info!("Aborting batch");
        self.global.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.global.is_cancelled()
    }

    /// Handle for `key`, created on first use. A signal sent before
    /// registration is kept, so the repository starts already cancelled.
    pub fn register(&self, key: &RepoKey) -> Arc<RepoHandle> {
        if let Some(handle) = self.get(key) {
            return handle;
        }
        let mut repos = self.repos.write().unwrap_or_else(PoisonError::into_inner);
        repos
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RepoHandle::new(key.clone(), &self.global)))
            .clone()
    }

    pub fn get(&self, key: &RepoKey) -> Option<Arc<RepoHandle>> {
        self.repos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Cancel one repository.
    pub fn signal(&self, key: &RepoKey, reason: CancelReason) {
        info!(repo = %key, reason = %reason, "Cancelling repository");
        self.register(key).cancel(reason);
    }

    pub fn status(&self, key: &RepoKey) -> Option<RepoStatus> {
        self.get(key).map(|handle| handle.status())
    }
}
