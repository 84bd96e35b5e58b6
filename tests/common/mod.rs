#![allow(dead_code)]

use bucketline::telemetry::MemorySink;
use bucketline::{Jitter, MockTransport, RequestHandler, RestConfig, TransportResponse};
use http::StatusCode;
use serde_json::json;
use std::time::Duration;

pub const BASE_URL: &str = "https://example.test/api/v10";

pub fn config() -> RestConfig {
    RestConfig::new("t0k").with_base_url(BASE_URL)
}

/// Handler on the tokio clock (so `start_paused` tests control time) with deterministic
/// backoff.
pub fn handler_with(mock: &MockTransport, config: RestConfig) -> RequestHandler {
    RequestHandler::builder(config)
        .transport(mock.clone())
        .jitter(Jitter::None)
        .build()
        .expect("valid test config")
}

pub fn handler(mock: &MockTransport) -> RequestHandler {
    handler_with(mock, config())
}

pub fn handler_with_sink(mock: &MockTransport, config: RestConfig, sink: &MemorySink) -> RequestHandler {
    RequestHandler::builder(config)
        .transport(mock.clone())
        .jitter(Jitter::None)
        .sink(sink.clone())
        .build()
        .expect("valid test config")
}

/// Full path as seen by the transport for an API path.
pub fn wire_path(path: &str) -> String {
    format!("/api/v10{path}")
}

pub fn ok() -> TransportResponse {
    TransportResponse::json(&json!({}))
}

/// 429 for a single route, waiting `retry_after`.
pub fn route_limited(retry_after: Duration) -> TransportResponse {
    TransportResponse::new(StatusCode::TOO_MANY_REQUESTS)
        .with_json(&json!({
            "message": "You are being rate limited.",
            "retry_after": retry_after.as_secs_f64(),
            "global": false
        }))
        .with_header("retry-after", format!("{:.3}", retry_after.as_secs_f64()))
        .with_header("x-ratelimit-scope", "user")
}

/// 429 that locks every route, waiting `retry_after`.
pub fn globally_limited(retry_after: Duration) -> TransportResponse {
    TransportResponse::new(StatusCode::TOO_MANY_REQUESTS)
        .with_json(&json!({
            "message": "You are being rate limited.",
            "retry_after": retry_after.as_secs_f64(),
            "global": true
        }))
        .with_header("retry-after", format!("{:.3}", retry_after.as_secs_f64()))
        .with_header("x-ratelimit-global", "true")
        .with_header("x-ratelimit-scope", "global")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}
