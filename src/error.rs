//! Error types surfaced by the dispatcher and the resource facades.
//!
//! Callers see one of four categories (see [`ErrorCategory`]):
//! - throttled: every attempt was answered with 429 until the retry limit ran out,
//! - transient: 5xx, network error or timeout until the retry limit ran out,
//! - caller: any other 4xx, surfaced on first sight and never retried,
//! - validation: a local precondition failed and nothing was sent.
use http::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cap the number of stored failures inside `RetryExhausted` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// A local precondition failed before any network call was made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A numeric argument (pagination limit, purge window, ...) is outside its allowed range.
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange { field: &'static str, min: u64, max: u64, value: u64 },
    /// Bulk delete accepts a bounded number of message ids.
    #[error("bulk delete takes between {min} and {max} messages (got {count})")]
    BulkDeleteCount { count: usize, min: usize, max: usize },
    /// Bulk delete refuses messages older than two weeks.
    #[error("message {id} is older than two weeks and cannot be bulk deleted")]
    StaleMessage { id: u64 },
}

/// Non-retryable HTTP error returned by the remote API (any non-2xx other than 429 and 5xx).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    /// Numeric API error code from the JSON body, when present.
    pub code: Option<u64>,
    /// Human readable message from the JSON body, when present.
    pub message: Option<String>,
    /// Parsed JSON body, or the raw text wrapped in `Value::String` when it was not JSON.
    pub body: Value,
    /// Attempts sent for the request, counting the one that got this response.
    pub attempts: usize,
}

impl ApiError {
    pub fn from_body(status: StatusCode, raw: &[u8]) -> Self {
        let body = serde_json::from_slice::<Value>(raw)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()));
        let code = body.get("code").and_then(Value::as_u64);
        let message = body.get("message").and_then(Value::as_str).map(str::to_owned);
        Self { status, code, message, body, attempts: 1 }
    }

    /// Record that the rejection came on attempt `attempts`, after earlier retries.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.code) {
            (Some(message), Some(code)) => write!(f, "{}: {} (code {})", self.status, message, code),
            (Some(message), None) => write!(f, "{}: {}", self.status, message),
            _ => write!(f, "{}: {}", self.status, self.body),
        }
    }
}

impl std::error::Error for ApiError {}

/// One failed attempt that the retry policy considers recoverable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Failure {
    /// HTTP 429.
    #[error("rate limited (global: {global}), retry after {retry_after:?}")]
    RateLimited { retry_after: Duration, global: bool },
    /// HTTP 5xx.
    #[error("server error {status}: {body}")]
    Server { status: StatusCode, body: String },
    /// Connection, TLS or protocol failure below HTTP.
    #[error("network error: {0}")]
    Network(String),
    /// No response within the per-attempt timeout.
    #[error("request timed out after {elapsed:?} (limit {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
}

impl Failure {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Failure::RateLimited { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Failure::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Failure::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Coarse cause of a [`RequestError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Throttled,
    Transient,
    Caller,
    Validation,
    /// Encoding, decoding, URL or shutdown problems on this side of the wire.
    Local,
}

fn describe_last(failures: &[Failure]) -> String {
    failures.last().map_or_else(|| "no recorded failures".to_owned(), ToString::to_string)
}

/// Error returned by [`crate::RequestHandler::request`] and every facade method.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("api error {0}")]
    Api(#[from] ApiError),
    #[error("retry exhausted after {attempts} attempts; last failure: {}", describe_last(.failures))]
    RetryExhausted { attempts: usize, failures: Arc<Vec<Failure>> },
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid value for header {name}")]
    InvalidHeader { name: String },
    #[error("request dispatcher shut down before replying")]
    Closed,
}

impl RequestError {
    /// Construct `RetryExhausted`, keeping only the most recent `MAX_RETRY_FAILURES` failures.
    pub fn retry_exhausted(attempts: usize, failures: Vec<Failure>) -> Self {
        let skip = failures.len().saturating_sub(MAX_RETRY_FAILURES);
        let trimmed = failures.into_iter().skip(skip).collect();
        RequestError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Api(_) => ErrorCategory::Caller,
            Self::RetryExhausted { failures, .. } => match failures.last() {
                Some(Failure::RateLimited { .. }) => ErrorCategory::Throttled,
                _ => ErrorCategory::Transient,
            },
            _ => ErrorCategory::Local,
        }
    }

    /// HTTP status of the final response, when one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api(e) => Some(e.status),
            Self::RetryExhausted { failures, .. } => failures.last().and_then(Failure::status),
            _ => None,
        }
    }

    /// Network attempts made before giving up (0 for local failures).
    pub fn attempts(&self) -> usize {
        match self {
            Self::Api(e) => e.attempts,
            Self::RetryExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Attempts beyond the first.
    pub fn retries(&self) -> usize {
        self.attempts().saturating_sub(1)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn failures(&self) -> Option<&[Failure]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn api_error_parses_json_body() {
        let err = ApiError::from_body(
            StatusCode::FORBIDDEN,
            br#"{"message": "Missing Permissions", "code": 50013}"#,
        );
        assert_eq!(err.code, Some(50013));
        assert_eq!(err.message.as_deref(), Some("Missing Permissions"));
        let msg = err.to_string();
        assert!(msg.contains("403"));
        assert!(msg.contains("Missing Permissions"));
        assert!(msg.contains("50013"));
    }

    #[test]
    fn api_error_keeps_non_json_body_as_text() {
        let err = ApiError::from_body(StatusCode::NOT_FOUND, b"<html>nope</html>");
        assert_eq!(err.body, Value::String("<html>nope</html>".into()));
        assert!(err.code.is_none());
    }

    #[test]
    fn retry_exhausted_display_includes_last_failure() {
        let err = RequestError::retry_exhausted(
            3,
            vec![
                Failure::Network("reset".into()),
                Failure::Server { status: StatusCode::BAD_GATEWAY, body: "upstream".into() },
            ],
        );
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("502"));
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn retry_exhausted_handles_empty_failures() {
        let err = RequestError::retry_exhausted(2, vec![]);
        assert!(err.to_string().contains("no recorded failures"));
    }

    #[test]
    fn retry_exhausted_caps_stored_failures() {
        let failures = (0..25).map(|i| Failure::Network(format!("attempt {i}"))).collect();
        let err = RequestError::retry_exhausted(25, failures);
        let kept = err.failures().unwrap();
        assert_eq!(kept.len(), MAX_RETRY_FAILURES);
        assert_eq!(kept.last(), Some(&Failure::Network("attempt 24".into())));
        assert_eq!(err.attempts(), 25);
    }

    #[test]
    fn throttled_category_follows_last_failure() {
        let err = RequestError::retry_exhausted(
            2,
            vec![Failure::RateLimited { retry_after: Duration::from_secs(1), global: false }],
        );
        assert_eq!(err.category(), ErrorCategory::Throttled);
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn caller_error_counts_one_attempt_and_no_retries() {
        let err: RequestError = ApiError::from_body(StatusCode::FORBIDDEN, b"{}").into();
        assert_eq!(err.category(), ErrorCategory::Caller);
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.retries(), 0);
        assert!(err.api_error().is_some());
    }

    #[test]
    fn caller_error_after_retries_keeps_the_count() {
        let err: RequestError = ApiError::from_body(StatusCode::NOT_FOUND, b"{}").with_attempts(3).into();
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.retries(), 2);
    }

    #[test]
    fn validation_error_is_transparent() {
        let err: RequestError =
            ValidationError::BulkDeleteCount { count: 1, min: 2, max: 100 }.into();
        assert!(err.is_validation());
        assert_eq!(err.attempts(), 0);
        assert!(err.to_string().contains("got 1"));
        assert!(err.source().is_none());
    }
}
