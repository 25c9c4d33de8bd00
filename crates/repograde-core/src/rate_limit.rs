//! Rate-limit bookkeeping exposed by external APIs.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Rate-limit counters read from response headers.
///
/// Only used to decide how long to wait before a retry; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    /// Reset time as seconds since the Unix epoch.
    pub reset: Option<i64>,
    pub used: Option<u64>,
    pub limit: Option<u64>,
}

impl RateLimitState {
    /// Read the `x-ratelimit-*` headers. Header names are matched
    /// case-insensitively; unparseable values are ignored.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = Self::default();
        for (name, value) in headers {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "x-ratelimit-remaining" => state.remaining = value.parse().ok(),
                "x-ratelimit-reset" => state.reset = value.parse().ok(),
                "x-ratelimit-used" => state.used = value.parse().ok(),
                "x-ratelimit-limit" => state.limit = value.parse().ok(),
                _ => {}
            }
        }
        state
    }

    /// State carrying only a reset timestamp.
    pub fn with_reset(reset: i64) -> Self {
        Self {
            reset: Some(reset),
            ..Self::default()
        }
    }

    /// True when the quota is known to be used up.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// True when no header was present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}
