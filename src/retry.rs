//! Retry policy for dispatched requests.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries) and can be overridden
//!   per request.
//! - 429 responses wait exactly what the server asked for (`Retry-After`, reset-after or
//!   the body's `retry_after`); the backoff schedule is not involved.
//! - 5xx responses, network errors and timeouts wait `jitter(backoff.delay(attempt))`.
//! - 2xx is success. Any other status is returned as a caller error on first sight.
//!
//! Invariants:
//! - Attempts never exceed the effective `max_attempts`.
//! - A request that is retried is retried in place: nothing queued behind it on the same
//!   bucket runs in between.

use crate::adaptive::DynamicConfig;
use crate::error::Failure;
use crate::rate_limit::RateLimitHeaders;
use crate::transport::TransportResponse;
use crate::{Backoff, Jitter};
use http::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Wait applied to a 429 that carries no usable retry hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// What one attempt's response means for the request.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// 2xx.
    Success,
    /// 429; wait `retry_after`, globally if `global`.
    RateLimited { retry_after: Duration, global: bool },
    /// 5xx; retry with backoff.
    Transient(Failure),
    /// Anything else (4xx other than 429, unfollowed 3xx, stray 1xx); never retried.
    Caller,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// Classify a response received from the transport.
pub fn classify(response: &TransportResponse, headers: &RateLimitHeaders) -> Classification {
    let status = response.status;
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = serde_json::from_slice::<RateLimitBody>(&response.body).ok();
        let from_body = body
            .as_ref()
            .and_then(|b| b.retry_after)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);
        let retry_after = headers
            .retry_after
            .or(from_body)
            .or(headers.reset_after)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        let global = headers.global || body.is_some_and(|b| b.global);
        return Classification::RateLimited { retry_after, global };
    }
    if status.is_server_error() {
        return Classification::Transient(Failure::Server { status, body: response.text() });
    }
    if status.is_success() {
        return Classification::Success;
    }
    Classification::Caller
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

/// Retry limit plus the backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: DynamicConfig<usize>,
    backoff: Backoff,
    jitter: Jitter,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Current default attempt limit.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts.value()
    }

    /// Change the default attempt limit for requests dispatched from now on.
    pub fn set_max_attempts(&self, attempts: usize) -> Result<(), BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        self.max_attempts.set(attempts);
        Ok(())
    }

    /// Attempt limit for one request, honoring a per-request override.
    pub fn limit_for(&self, override_attempts: Option<usize>) -> usize {
        override_attempts.filter(|n| *n > 0).unwrap_or_else(|| self.max_attempts())
    }

    /// Wait before retry number `retry` (1-based) after `failure`.
    pub fn delay_for(&self, retry: usize, failure: &Failure) -> Duration {
        match failure {
            Failure::RateLimited { retry_after, .. } => *retry_after,
            _ => self.jitter.apply(self.backoff.delay(retry)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::new().into_policy()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
}

impl RetryPolicyBuilder {
    /// Defaults: 3 attempts, exponential backoff from 500 ms capped at 10 s, full jitter.
    pub fn new() -> Self {
        let backoff = Backoff::exponential(Duration::from_millis(500))
            .with_max(Duration::from_secs(10))
            .unwrap_or_default();
        Self { max_attempts: 3, backoff, jitter: Jitter::full() }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(self.into_policy())
    }

    fn into_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: DynamicConfig::new(self.max_attempts.max(1)),
            backoff: self.backoff,
            jitter: self.jitter,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify_response(response: TransportResponse) -> Classification {
        let headers = RateLimitHeaders::parse(&response.headers);
        classify(&response, &headers)
    }

    #[test]
    fn success_and_caller_errors() {
        assert_eq!(classify_response(TransportResponse::new(StatusCode::OK)), Classification::Success);
        assert_eq!(
            classify_response(TransportResponse::new(StatusCode::NO_CONTENT)),
            Classification::Success
        );
        assert_eq!(
            classify_response(TransportResponse::new(StatusCode::FORBIDDEN)),
            Classification::Caller
        );
        assert_eq!(
            classify_response(TransportResponse::new(StatusCode::NOT_FOUND)),
            Classification::Caller
        );
    }

    #[test]
    fn redirects_are_not_successes() {
        let found = TransportResponse::new(StatusCode::FOUND).with_header("location", "https://example.test/elsewhere");
        assert_eq!(classify_response(found), Classification::Caller);
        assert_eq!(
            classify_response(TransportResponse::new(StatusCode::NOT_MODIFIED)),
            Classification::Caller
        );
        assert_eq!(classify_response(TransportResponse::new(StatusCode::CONTINUE)), Classification::Caller);
    }

    #[test]
    fn server_errors_are_transient() {
        let response = TransportResponse::new(StatusCode::BAD_GATEWAY).with_body("upstream down");
        assert_eq!(
            classify_response(response),
            Classification::Transient(Failure::Server {
                status: StatusCode::BAD_GATEWAY,
                body: "upstream down".into(),
            })
        );
    }

    #[test]
    fn rate_limit_prefers_retry_after_header() {
        let response = TransportResponse::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header("retry-after", "2")
            .with_json(&json!({"retry_after": 0.5, "global": false}));
        assert_eq!(
            classify_response(response),
            Classification::RateLimited { retry_after: Duration::from_secs(2), global: false }
        );
    }

    #[test]
    fn rate_limit_falls_back_to_body() {
        let response = TransportResponse::new(StatusCode::TOO_MANY_REQUESTS)
            .with_json(&json!({"message": "You are being rate limited.", "retry_after": 0.25, "global": true}));
        assert_eq!(
            classify_response(response),
            Classification::RateLimited { retry_after: Duration::from_millis(250), global: true }
        );
    }

    #[test]
    fn rate_limit_global_header_and_default_wait() {
        let response = TransportResponse::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header("x-ratelimit-global", "true");
        assert_eq!(
            classify_response(response),
            Classification::RateLimited { retry_after: DEFAULT_RETRY_AFTER, global: true }
        );
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        assert_eq!(
            RetryPolicy::builder().max_attempts(0).build().unwrap_err(),
            BuildError::InvalidMaxAttempts(0)
        );
    }

    #[test]
    fn per_request_override_wins_unless_zero() {
        let policy = RetryPolicy::builder().max_attempts(4).build().unwrap();
        assert_eq!(policy.limit_for(None), 4);
        assert_eq!(policy.limit_for(Some(1)), 1);
        assert_eq!(policy.limit_for(Some(0)), 4);
        policy.set_max_attempts(6).unwrap();
        assert_eq!(policy.limit_for(None), 6);
        assert!(policy.set_max_attempts(0).is_err());
    }

    #[test]
    fn delays_follow_failure_kind() {
        let policy = RetryPolicy::builder()
            .backoff(Backoff::constant(Duration::from_millis(300)))
            .with_jitter(Jitter::None)
            .build()
            .unwrap();
        let throttled = Failure::RateLimited { retry_after: Duration::from_secs(7), global: false };
        assert_eq!(policy.delay_for(1, &throttled), Duration::from_secs(7));
        assert_eq!(policy.delay_for(2, &Failure::Network("reset".into())), Duration::from_millis(300));
    }
}
