use super::RateLimitHeaders;
use std::time::Duration;

/// Budget of one rate-limit bucket.
///
/// Times are milliseconds on the handler's [`crate::Clock`], never server timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Calls allowed per window.
    pub limit: u32,
    /// Calls left in the current window.
    pub remaining: u32,
    /// Local clock millis at which the window resets.
    pub reset_at: u64,
    /// Window length as last reported by the server.
    pub reset_after: Duration,
    /// Server-side bucket id, when the server reports one.
    pub id: Option<String>,
}

impl Bucket {
    /// A full bucket of `limit` calls per `window`, whose first window starts on first use.
    pub fn window(limit: u32, window: Duration) -> Self {
        Self { limit, remaining: limit, reset_at: 0, reset_after: window, id: None }
    }

    /// Build from response headers received at local clock time `now`.
    ///
    /// Returns `None` unless limit, remaining and some reset information are all present.
    /// The result depends only on the headers and the receipt time, so applying the same
    /// response twice yields the same bucket.
    pub fn from_headers(headers: &RateLimitHeaders, now: u64, unix_now_millis: u64) -> Option<Self> {
        let limit = headers.limit?;
        let remaining = headers.remaining?;
        let reset_after = headers.reset_in(unix_now_millis)?;
        Some(Self {
            limit,
            remaining,
            reset_at: now.saturating_add(millis(reset_after)),
            reset_after,
            id: headers.bucket.clone(),
        })
    }

    /// How long a new request must wait, or `None` if it may go now.
    pub fn wait_time(&self, now: u64) -> Option<Duration> {
        if self.remaining > 0 || now >= self.reset_at {
            None
        } else {
            Some(Duration::from_millis(self.reset_at - now))
        }
    }

    /// Account for one request leaving at `now`.
    ///
    /// A window that has already elapsed is refilled first and a new one starts at `now`.
    pub fn consume(&mut self, now: u64) {
        if now >= self.reset_at {
            self.refresh(now);
        }
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Start a fresh window at `now` after a wait for the old one to expire.
    pub fn refresh(&mut self, now: u64) {
        self.remaining = self.limit;
        self.reset_at = now.saturating_add(millis(self.reset_after));
    }

    /// Block the bucket until `deadline` (after a per-route 429).
    pub fn drain_until(&mut self, deadline: u64) {
        self.remaining = 0;
        self.reset_at = self.reset_at.max(deadline);
    }

    pub fn is_exhausted(&self, now: u64) -> bool {
        self.wait_time(now).is_some()
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
