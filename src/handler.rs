//! The request dispatcher.
//!
//! [`RequestHandler::request`] is the single entry point every API call goes through:
//!
//! 1. the request is resolved to its route key and encoded,
//! 2. it joins the FIFO queue of its bucket,
//! 3. the bucket's worker waits for the global gate and for bucket capacity, sends it,
//!    folds the response headers into the bucket state and retries it in place when it
//!    is throttled or fails transiently,
//! 4. the outcome comes back through a oneshot channel.
//!
//! A caller that stops waiting does not cancel anything; its request still runs and still
//! updates the bucket.

use crate::adaptive::DynamicConfig;
use crate::body::RequestBody;
use crate::config::{ConfigError, RestConfig};
use crate::error::{ApiError, Failure, RequestError};
use crate::queue::{BucketQueues, BucketWorker};
use crate::rate_limit::bucket::millis;
use crate::rate_limit::{BucketStore, GlobalGate, GlobalLock, InMemoryBucketStore, RateLimitHeaders};
use crate::retry::{self, BuildError, Classification, RetryPolicy};
use crate::route::{Route, RouteKeyResolver};
use crate::snowflake::unix_now_millis;
use crate::telemetry::{emit_best_effort, DispatchEvent, NullSink, TelemetrySink};
use crate::timeout::TimeoutPolicy;
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
use crate::{Clock, Jitter, MonotonicClock, Sleeper, TokioSleeper};
use async_trait::async_trait;
use futures::future::BoxFuture;
use http::header::{AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tower::util::BoxCloneService;
use url::Url;

/// Header carrying the audit log reason, percent-encoded.
pub const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

type Sink = BoxCloneService<DispatchEvent, (), Infallible>;

/// One API call as described by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    headers: Vec<(String, String)>,
    reason: Option<String>,
    max_attempts: Option<usize>,
    raw: bool,
}

impl ApiRequest {
    /// `path` is relative to the base URL, with major parameters already substituted
    /// (`/channels/123/messages`).
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            reason: None,
            max_attempts: None,
            raw: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a query pair only when `value` is present.
    pub fn query_opt<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, RequestError> {
        Ok(self.body(RequestBody::json(value)?))
    }

    /// Extra header; validated when the request is dispatched.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Audit log reason, sent percent-encoded in `X-Audit-Log-Reason`.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn reason_opt(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::to_owned);
        self
    }

    /// Override the handler's total attempt limit for this request.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Return the response envelope untouched instead of parsed JSON.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body_ref(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// Parsed body; `Value::Null` for empty bodies and 204.
    Json(Value),
    /// Untouched envelope, for requests built with [`ApiRequest::raw`].
    Raw(TransportResponse),
}

impl ApiResponse {
    pub fn json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            ApiResponse::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&TransportResponse> {
        match self {
            ApiResponse::Raw(response) => Some(response),
            ApiResponse::Json(_) => None,
        }
    }

    /// The body as JSON, parsing a raw envelope if needed.
    pub fn into_value(self) -> Result<Value, RequestError> {
        match self {
            ApiResponse::Json(value) => Ok(value),
            ApiResponse::Raw(response) => body_value(&response),
        }
    }
}

fn body_value(response: &TransportResponse) -> Result<Value, RequestError> {
    if response.status == StatusCode::NO_CONTENT || response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    response.parse_json().map_err(RequestError::Decode)
}

fn decode(response: TransportResponse, raw: bool) -> Result<ApiResponse, RequestError> {
    if raw {
        return Ok(ApiResponse::Raw(response));
    }
    body_value(&response).map(ApiResponse::Json)
}

/// A request waiting in (or being executed from) its bucket queue.
struct QueuedRequest {
    route: Route,
    request: TransportRequest,
    max_attempts: usize,
    raw: bool,
    reply: oneshot::Sender<Result<ApiResponse, RequestError>>,
}

/// State shared by all bucket workers of one handler.
struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn BucketStore>,
    global: GlobalGate,
    retry: RetryPolicy,
    timeout: TimeoutPolicy,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sink: Mutex<Sink>,
}

impl Dispatcher {
    async fn emit(&self, event: DispatchEvent) {
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner).clone();
        emit_best_effort(sink, event).await;
    }

    /// Block until the global gate and the bucket both allow one more request.
    async fn wait_for_capacity(&self, route: &Route) {
        let key = route.key();
        let exempt = route.exempt_from_global();
        loop {
            if !exempt {
                if let Some((_, wait)) = self.global.lock().wait_time(self.clock.now_millis()) {
                    tracing::debug!(route = key, wait_ms = millis(wait), "global rate limit active");
                    self.emit(DispatchEvent::GlobalWait { route: key.to_owned(), wait }).await;
                    self.global.wait_unlocked(self.clock.as_ref(), self.sleeper.as_ref()).await;
                }
            }

            if let Some(mut bucket) = self.store.get(key).await {
                if let Some(wait) = bucket.wait_time(self.clock.now_millis()) {
                    tracing::debug!(
                        route = key,
                        wait_ms = millis(wait),
                        limit = bucket.limit,
                        "bucket exhausted, waiting for reset"
                    );
                    self.emit(DispatchEvent::BucketWait { route: key.to_owned(), wait }).await;
                    self.sleeper.sleep(wait).await;
                    bucket.refresh(self.clock.now_millis());
                    self.store.put(key, bucket).await;
                    // a global lock may have been raised while we slept
                    continue;
                }
            }

            if exempt {
                return;
            }
            let now = self.clock.now_millis();
            if self.global.lock().is_locked(now) {
                continue;
            }
            match self.global.try_acquire(now) {
                Ok(()) => return,
                Err((reset_at, wait)) => {
                    tracing::debug!(route = key, wait_ms = millis(wait), "global request budget spent");
                    self.emit(DispatchEvent::GlobalWait { route: key.to_owned(), wait }).await;
                    self.sleeper.sleep(wait).await;
                    self.global.refresh_after_wait(reset_at, self.clock.now_millis());
                }
            }
        }
    }

    async fn consume(&self, key: &str) {
        if let Some(mut bucket) = self.store.get(key).await {
            bucket.consume(self.clock.now_millis());
            self.store.put(key, bucket).await;
        }
    }

    async fn execute(
        &self,
        route: &Route,
        request: &TransportRequest,
        max_attempts: usize,
        raw: bool,
    ) -> Result<ApiResponse, RequestError> {
        let key = route.key();
        let started = Instant::now();
        let mut failures = Vec::new();
        let mut attempt = 0;

        loop {
            self.wait_for_capacity(route).await;
            attempt += 1;
            self.consume(key).await;
            tracing::debug!(route = key, attempt, "sending request");
            self.emit(DispatchEvent::Sent { route: key.to_owned(), attempt }).await;

            // Wait to apply before the retry when neither the bucket nor the global gate
            // will enforce it.
            let mut inline_wait = None;
            let failure = match self.timeout.execute(self.transport.send(request.clone())).await {
                Ok(Ok(response)) => {
                    let received = self.clock.now_millis();
                    let headers = RateLimitHeaders::parse(&response.headers);
                    self.store.update(key, &headers, received, unix_now_millis()).await;

                    match retry::classify(&response, &headers) {
                        Classification::Success => {
                            self.emit(DispatchEvent::Completed {
                                route: key.to_owned(),
                                status: response.status.as_u16(),
                                attempts: attempt,
                                duration: started.elapsed(),
                            })
                            .await;
                            return decode(response, raw);
                        }
                        Classification::Caller => {
                            let error = RequestError::from(
                                ApiError::from_body(response.status, &response.body).with_attempts(attempt),
                            );
                            tracing::debug!(route = key, status = response.status.as_u16(), "request rejected");
                            self.emit(DispatchEvent::Failed {
                                route: key.to_owned(),
                                attempts: attempt,
                                category: error.category(),
                                duration: started.elapsed(),
                            })
                            .await;
                            return Err(error);
                        }
                        Classification::RateLimited { retry_after, global } => {
                            tracing::warn!(
                                route = key,
                                retry_after_ms = millis(retry_after),
                                global,
                                scope = headers.scope.as_deref().unwrap_or("unknown"),
                                "rate limited"
                            );
                            self.emit(DispatchEvent::RateLimited { route: key.to_owned(), retry_after, global })
                                .await;
                            let deadline = received.saturating_add(millis(retry_after));
                            if global {
                                self.global.lock().lock_until(deadline);
                                if route.exempt_from_global() {
                                    inline_wait = Some(retry_after);
                                }
                            } else if let Some(mut bucket) = self.store.get(key).await {
                                bucket.drain_until(deadline);
                                self.store.put(key, bucket).await;
                            } else {
                                inline_wait = Some(retry_after);
                            }
                            Failure::RateLimited { retry_after, global }
                        }
                        Classification::Transient(failure) => failure,
                    }
                }
                Ok(Err(error)) => Failure::Network(error.message),
                Err(timeout) => timeout,
            };

            let delay = match failure {
                Failure::RateLimited { .. } => inline_wait.unwrap_or(Duration::ZERO),
                _ => self.retry.delay_for(attempt, &failure),
            };
            failures.push(failure);

            if attempt >= max_attempts {
                let error = RequestError::retry_exhausted(attempt, failures);
                tracing::error!(route = key, attempts = attempt, error = %error, "request failed");
                self.emit(DispatchEvent::Failed {
                    route: key.to_owned(),
                    attempts: attempt,
                    category: error.category(),
                    duration: started.elapsed(),
                })
                .await;
                return Err(error);
            }

            tracing::debug!(route = key, attempt, delay_ms = millis(delay), "retrying");
            self.emit(DispatchEvent::Retry { route: key.to_owned(), attempt, delay }).await;
            if !delay.is_zero() {
                self.sleeper.sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl BucketWorker for Dispatcher {
    type Job = QueuedRequest;

    async fn run(&self, _key: &str, job: QueuedRequest) {
        let QueuedRequest { route, request, max_attempts, raw, reply } = job;
        let result = self.execute(&route, &request, max_attempts, raw).await;
        if reply.send(result).is_err() {
            tracing::debug!(route = route.key(), "caller stopped waiting; response discarded");
        }
    }

    async fn retired(&self, key: &str) {
        self.emit(DispatchEvent::WorkerRetired { route: key.to_owned() }).await;
    }
}

/// Rate-limit-aware dispatcher for REST calls. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RequestHandler {
    dispatcher: Arc<Dispatcher>,
    queues: BucketQueues<Dispatcher>,
    resolver: RouteKeyResolver,
    base_url: Url,
    default_headers: HeaderMap,
    global_rate: DynamicConfig<Option<u32>>,
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("base_url", &self.base_url.as_str())
            .field("transport", &self.dispatcher.transport)
            .field("store", &self.dispatcher.store)
            .field("queues", &self.queues)
            .finish()
    }
}

impl RequestHandler {
    /// Handler with the production transport, an in-memory store and the tokio clock.
    pub fn new(config: RestConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: RestConfig) -> RequestHandlerBuilder {
        RequestHandlerBuilder::new(config)
    }

    /// Dispatch `request` and wait for its outcome.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        let (route, prepared) = self.prepare(&request)?;
        let (reply, outcome) = oneshot::channel();
        let key = route.key().to_owned();
        self.queues.enqueue(
            &key,
            QueuedRequest {
                route,
                request: prepared,
                max_attempts: self.dispatcher.retry.limit_for(request.max_attempts),
                raw: request.raw,
                reply,
            },
        );
        outcome.await.map_err(|_| RequestError::Closed)?
    }

    /// Dispatch `request` and deserialize the JSON body into `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, RequestError> {
        let value = self.request(request).await?.into_value()?;
        serde_json::from_value(value).map_err(RequestError::Decode)
    }

    /// Bucket identity `request` would be queued under.
    pub fn route_for(&self, method: &Method, path: &str) -> Route {
        self.resolver.resolve(method, path)
    }

    pub fn store(&self) -> Arc<dyn BucketStore> {
        self.dispatcher.store.clone()
    }

    pub fn global_lock(&self) -> &GlobalLock {
        self.dispatcher.global.lock()
    }

    pub fn max_attempts(&self) -> usize {
        self.dispatcher.retry.max_attempts()
    }

    /// Change the default attempt limit on a live handler.
    pub fn set_max_attempts(&self, attempts: usize) -> Result<(), BuildError> {
        self.dispatcher.retry.set_max_attempts(attempts)
    }

    /// Change (or disable with `None`) the proactive global request budget.
    pub fn set_global_requests_per_second(&self, limit: Option<u32>) {
        self.global_rate.set(limit.filter(|n| *n > 0));
    }

    /// Bucket keys with a live worker.
    pub fn active_workers(&self) -> usize {
        self.queues.active_workers()
    }

    fn prepare(&self, request: &ApiRequest) -> Result<(Route, TransportRequest), RequestError> {
        let path = request.path.trim_start_matches('/');
        let route = self.resolver.resolve(&request.method, path);

        let mut url = self.base_url.join(path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let mut headers = self.default_headers.clone();
        for (name, value) in &request.headers {
            let invalid = || RequestError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }
        if let Some(reason) = request.reason.as_deref().filter(|r| !r.is_empty()) {
            let value = HeaderValue::from_str(&urlencoding::encode(reason))
                .map_err(|_| RequestError::InvalidHeader { name: AUDIT_LOG_REASON.to_owned() })?;
            headers.insert(HeaderName::from_static(AUDIT_LOG_REASON), value);
        }

        let body = request.body.as_ref().map(RequestBody::encode).transpose()?;
        Ok((route, TransportRequest { method: request.method.clone(), url, headers, body }))
    }
}

impl tower_service::Service<ApiRequest> for RequestHandler {
    type Response = ApiResponse;
    type Error = RequestError;
    type Future = BoxFuture<'static, Result<ApiResponse, RequestError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ApiRequest) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { handler.request(request).await })
    }
}

/// Assembles a [`RequestHandler`] from a config and optional collaborators.
pub struct RequestHandlerBuilder {
    config: RestConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn BucketStore>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    sink: Option<Sink>,
    jitter: Jitter,
}

impl RequestHandlerBuilder {
    pub fn new(config: RestConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            clock: None,
            sleeper: None,
            sink: None,
            jitter: Jitter::full(),
        }
    }

    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Share one bucket store between handlers, or supply a custom backend.
    pub fn store(mut self, store: Arc<dyn BucketStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Telemetry sink for [`DispatchEvent`]s (default: [`NullSink`]).
    pub fn sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink<SinkError = Infallible>,
        S::Future: Send + 'static,
    {
        self.sink = Some(BoxCloneService::new(sink));
        self
    }

    /// Jitter applied to transient-failure backoff (default: full).
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<RequestHandler, ConfigError> {
        let config = self.config;
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        if let Some(authorization) = config.authorization() {
            let mut value =
                HeaderValue::from_str(&authorization).map_err(|_| ConfigError::Header("authorization"))?;
            value.set_sensitive(true);
            default_headers.insert(AUTHORIZATION, value);
        }
        let user_agent =
            HeaderValue::from_str(&config.user_agent).map_err(|_| ConfigError::Header("user-agent"))?;
        default_headers.insert(USER_AGENT, user_agent);

        let retry = RetryPolicy::builder()
            .max_attempts(config.max_attempts)
            .backoff(config.backoff()?)
            .with_jitter(self.jitter)
            .build()?;
        let global_rate = DynamicConfig::new(config.global_requests_per_second);

        let dispatcher = Arc::new(Dispatcher {
            transport: self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryBucketStore::new())),
            global: GlobalGate::new(global_rate.clone()),
            retry,
            timeout: config.timeout_policy()?,
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::default())),
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            sink: Mutex::new(self.sink.unwrap_or_else(|| BoxCloneService::new(NullSink))),
        });
        let queues = BucketQueues::new(dispatcher.clone(), config.worker_idle_timeout);

        tracing::debug!(base_url = %config.base_url, "request handler ready");
        Ok(RequestHandler {
            dispatcher,
            queues,
            resolver: config.resolver(),
            base_url: config.parsed_base_url()?,
            default_headers,
            global_rate,
        })
    }
}
