//! HTTP transport: one request in, one response (or network error) out.
//!
//! The dispatcher owns rate limiting, retries and timeouts; a transport only performs a
//! single exchange. [`ReqwestTransport`] is the production implementation;
//! [`MockTransport`] replays scripted responses and records what it was sent, so tests
//! never touch the network.

use crate::body::{EncodedBody, JSON_CONTENT_TYPE};
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// A fully built request, ready for the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<EncodedBody>,
}

/// Raw response envelope: status, headers and untouched body bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Vec::new() }
    }

    /// 200 with a JSON body.
    pub fn json(value: &Value) -> Self {
        Self::new(StatusCode::OK).with_json(value)
    }

    pub fn with_json(mut self, value: &Value) -> Self {
        self.body = value.to_string().into_bytes();
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header; invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value.as_ref()))
        {
            self.headers.insert(name, value);
        }
        self
    }

    /// Attach a standard set of bucket headers.
    pub fn with_rate_limit(self, limit: u32, remaining: u32, reset_after: Duration) -> Self {
        self.with_header("x-ratelimit-limit", limit.to_string())
            .with_header("x-ratelimit-remaining", remaining.to_string())
            .with_header("x-ratelimit-reset-after", format!("{:.3}", reset_after.as_secs_f64()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Failure below HTTP: DNS, connect, TLS, reset, malformed response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let TransportRequest { method, url, headers, body } = request;
        let mut builder = self.client.request(method, url).headers(headers);
        builder = match body {
            Some(EncodedBody::Json(bytes)) => builder.header(CONTENT_TYPE, JSON_CONTENT_TYPE).body(bytes),
            Some(EncodedBody::Multipart(form)) => {
                builder.multipart(form.into_reqwest().map_err(|e| TransportError::new(e.to_string()))?)
            }
            None => builder,
        };

        let response = builder.send().await.map_err(|e| TransportError::new(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| TransportError::new(e.to_string()))?;
        Ok(TransportResponse { status, headers, body: body.to_vec() })
    }
}

/// One scripted outcome for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockReply {
    pub result: Result<TransportResponse, TransportError>,
    /// Simulated latency before the outcome is returned.
    pub delay: Duration,
}

impl MockReply {
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl From<TransportResponse> for MockReply {
    fn from(response: TransportResponse) -> Self {
        Self { result: Ok(response), delay: Duration::ZERO }
    }
}

impl From<TransportError> for MockReply {
    fn from(error: TransportError) -> Self {
        Self { result: Err(error), delay: Duration::ZERO }
    }
}

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: TransportRequest,
    /// Time since the mock was created (tokio clock, so paused time applies).
    pub started_at: Duration,
}

impl RecordedCall {
    pub fn path(&self) -> &str {
        self.request.url.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Responder = dyn Fn(&TransportRequest, usize) -> MockReply + Send + Sync;

struct MockState {
    script: Mutex<VecDeque<MockReply>>,
    responder: Mutex<Option<Arc<Responder>>>,
    calls: Mutex<Vec<RecordedCall>>,
    created: Instant,
}

/// Scripted transport for tests.
///
/// Replies come from, in order: the FIFO script, the responder closure, and finally a
/// `200 {}` fallback. Clones share the script and the call log.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("scripted", &lock(&self.state.script).len())
            .field("calls", &lock(&self.state.calls).len())
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                script: Mutex::new(VecDeque::new()),
                responder: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                created: Instant::now(),
            }),
        }
    }

    /// Queue a reply for the next unanswered call.
    pub fn push(&self, reply: impl Into<MockReply>) -> &Self {
        lock(&self.state.script).push_back(reply.into());
        self
    }

    /// Answer unscripted calls with `f(request, call_index)`.
    pub fn respond_with<F>(&self, f: F) -> &Self
    where
        F: Fn(&TransportRequest, usize) -> MockReply + Send + Sync + 'static,
    {
        *lock(&self.state.responder) = Some(Arc::new(f));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state.calls).len()
    }

    /// Recorded calls whose URL path equals `path`.
    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path() == path).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let index = {
            let mut calls = lock(&self.state.calls);
            calls.push(RecordedCall {
                request: request.clone(),
                started_at: self.state.created.elapsed(),
            });
            calls.len() - 1
        };
        let scripted = lock(&self.state.script).pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None => match lock(&self.state.responder).clone() {
                Some(responder) => responder(&request, index),
                None => TransportResponse::json(&Value::Object(Default::default())).into(),
            },
        };
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}
