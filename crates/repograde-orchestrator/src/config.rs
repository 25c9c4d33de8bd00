//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default bound on a single `git clone`.
pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bound on one repository's grading call, retries included.
pub const DEFAULT_GRADING_TIMEOUT: Duration = Duration::from_secs(600);

/// Batch configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory under which each batch gets its own `batch-<id>` folder.
    pub work_root: PathBuf,

    /// Time bound for each clone.
    pub clone_timeout: Duration,

    /// Time bound for each repository's grading.
    pub grading_timeout: Duration,

    /// Number of clones in flight at once. `1` clones sequentially.
    pub clone_concurrency: usize,

    /// Cap on concurrent grading tasks. `None` grades every repository at once.
    pub grading_concurrency: Option<usize>,

    /// Rate-limit retry budgets and backoff.
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("repograde"),
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
            grading_timeout: DEFAULT_GRADING_TIMEOUT,
            clone_concurrency: 1,
            grading_concurrency: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    pub fn with_grading_timeout(mut self, timeout: Duration) -> Self {
        self.grading_timeout = timeout;
        self
    }

    /// Zero is treated as one.
    pub fn with_clone_concurrency(mut self, concurrency: usize) -> Self {
        self.clone_concurrency = concurrency.max(1);
        self
    }

    pub fn with_grading_concurrency(mut self, concurrency: Option<usize>) -> Self {
        self.grading_concurrency = concurrency.map(|n| n.max(1));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Retry budgets for rate-limited calls.
///
/// Budgets count retries after the initial call, so `max_primary_retries = 3`
/// allows up to four calls that hit the primary limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_primary_retries: u32,
    pub max_secondary_retries: u32,
    /// First secondary backoff delay; doubled on every further retry.
    pub base_delay: Duration,
    /// Upper bound on a single secondary backoff delay, before jitter.
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay, added on top.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_primary_retries: 3,
            max_secondary_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_primary_retries: 0,
            max_secondary_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_primary_retries(mut self, retries: u32) -> Self {
        self.max_primary_retries = retries;
        self
    }

    pub fn with_max_secondary_retries(mut self, retries: u32) -> Self {
        self.max_secondary_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }
}
