//! Rate limit state.
//!
//! - [`Bucket`]: budget of one route bucket (limit, remaining, reset), refreshed from
//!   response headers.
//! - [`BucketStore`]: where buckets live. Injected into the handler so independent handlers
//!   never share state; [`InMemoryBucketStore`] is the default.
//! - [`GlobalGate`]: the global lock raised by a global 429 plus the proactive
//!   requests-per-second budget shared by every route.
//!
//! Bucket state has a single writer: the worker task that owns the bucket's queue. The
//! store's own lock only guards the map.

use http::HeaderMap;
use std::time::Duration;

pub mod bucket;
pub mod global;
pub mod store;

pub use bucket::Bucket;
pub use global::{GlobalGate, GlobalLock};
pub use store::{BucketStore, InMemoryBucketStore};

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_SCOPE: &str = "x-ratelimit-scope";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Rate limit information carried by one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Relative reset (`X-RateLimit-Reset-After`); preferred over `reset_at_unix`.
    pub reset_after: Option<Duration>,
    /// Absolute reset in unix seconds (`X-RateLimit-Reset`), by the server's clock.
    pub reset_at_unix: Option<f64>,
    /// Opaque server-side bucket id.
    pub bucket: Option<String>,
    pub global: bool,
    /// `user`, `global` or `shared`.
    pub scope: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn parse(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let seconds = |name: &str| {
            text(name)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s >= 0.0)
        };

        Self {
            limit: text(HEADER_LIMIT).and_then(|v| v.parse().ok()),
            remaining: text(HEADER_REMAINING).and_then(|v| v.parse().ok()),
            reset_after: seconds(HEADER_RESET_AFTER).map(Duration::from_secs_f64),
            reset_at_unix: seconds(HEADER_RESET),
            bucket: text(HEADER_BUCKET).map(str::to_owned),
            global: text(HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: text(HEADER_SCOPE).map(str::to_owned),
            retry_after: seconds(HEADER_RETRY_AFTER).map(Duration::from_secs_f64),
        }
    }

    /// Whether there is enough to (re)build a bucket.
    pub fn has_bucket_info(&self) -> bool {
        self.limit.is_some()
            && self.remaining.is_some()
            && (self.reset_after.is_some() || self.reset_at_unix.is_some())
    }

    /// Time until the bucket resets, relative to local receipt.
    ///
    /// Uses `reset_after` when present so server clock skew does not matter; otherwise
    /// falls back to the absolute reset against the local wall clock, clamped at zero.
    pub fn reset_in(&self, unix_now_millis: u64) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(after);
        }
        self.reset_at_unix.map(|reset| {
            let reset_millis = (reset * 1_000.0) as u64;
            Duration::from_millis(reset_millis.saturating_sub(unix_now_millis))
        })
    }
}
