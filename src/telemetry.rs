//! Dispatch telemetry.
//!
//! The handler reports what it does (waits, sends, retries, outcomes) as
//! [`DispatchEvent`]s through a sink. A sink is any `tower::Service<DispatchEvent>`, so
//! the usual tower combinators apply. Emission is best effort: a sink that is not ready or
//! that fails simply loses the event.
//!
//! ```rust
//! use bucketline::telemetry::{DispatchEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(DispatchEvent::WorkerRetired { route: "GET /gateway/bot".into() }).await.unwrap();
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

use crate::error::ErrorCategory;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes dispatch events.
pub trait TelemetrySink:
    Service<DispatchEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: DispatchEvent)
where
    S: Service<DispatchEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Something the dispatcher did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// The request waited for its bucket to reset.
    BucketWait { route: String, wait: Duration },
    /// The request waited on the global lock or the global per-second budget.
    GlobalWait { route: String, wait: Duration },
    /// An attempt went out on the wire.
    Sent { route: String, attempt: usize },
    /// A 429 was received.
    RateLimited { route: String, retry_after: Duration, global: bool },
    /// An attempt failed and will be retried after `delay`.
    Retry { route: String, attempt: usize, delay: Duration },
    /// The request finished successfully.
    Completed { route: String, status: u16, attempts: usize, duration: Duration },
    /// The request failed for good.
    Failed { route: String, attempts: usize, category: ErrorCategory, duration: Duration },
    /// A bucket worker shut down after its queue stayed empty.
    WorkerRetired { route: String },
}

impl DispatchEvent {
    /// Route key the event belongs to.
    pub fn route(&self) -> &str {
        match self {
            DispatchEvent::BucketWait { route, .. }
            | DispatchEvent::GlobalWait { route, .. }
            | DispatchEvent::Sent { route, .. }
            | DispatchEvent::RateLimited { route, .. }
            | DispatchEvent::Retry { route, .. }
            | DispatchEvent::Completed { route, .. }
            | DispatchEvent::Failed { route, .. }
            | DispatchEvent::WorkerRetired { route } => route,
        }
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchEvent::BucketWait { route, wait } => write!(f, "BucketWait({route}, {wait:?})"),
            DispatchEvent::GlobalWait { route, wait } => write!(f, "GlobalWait({route}, {wait:?})"),
            DispatchEvent::Sent { route, attempt } => write!(f, "Sent({route}, #{attempt})"),
            DispatchEvent::RateLimited { route, retry_after, global } => {
                write!(f, "RateLimited({route}, retry_after={retry_after:?}, global={global})")
            }
            DispatchEvent::Retry { route, attempt, delay } => {
                write!(f, "Retry({route}, #{attempt}, delay={delay:?})")
            }
            DispatchEvent::Completed { route, status, attempts, duration } => {
                write!(f, "Completed({route}, {status}, attempts={attempts}, duration={duration:?})")
            }
            DispatchEvent::Failed { route, attempts, category, duration } => {
                write!(f, "Failed({route}, {category:?}, attempts={attempts}, duration={duration:?})")
            }
            DispatchEvent::WorkerRetired { route } => write!(f, "WorkerRetired({route})"),
        }
    }
}

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// Discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<DispatchEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: DispatchEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs every event at INFO through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<DispatchEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: DispatchEvent) -> Self::Future {
        tracing::info!(route = event.route(), event = %event, "dispatch_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory; oldest events are evicted past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DispatchEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink (cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.lock().clone()
    }

    /// Events for one route key, in emission order.
    pub fn events_for(&self, route: &str) -> Vec<DispatchEvent> {
        self.lock().iter().filter(|e| e.route() == route).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DispatchEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<DispatchEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: DispatchEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(route: &str, attempt: usize) -> DispatchEvent {
        DispatchEvent::Sent { route: route.into(), attempt }
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let mut sink = MemorySink::with_capacity(2);
        sink.call(sent("a", 1)).await.unwrap();
        sink.call(sent("b", 1)).await.unwrap();
        sink.call(sent("a", 2)).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events_for("a"), vec![sent("a", 2)]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn emit_best_effort_swallows_errors() {
        #[derive(Clone)]
        struct Fails;
        impl TelemetrySink for Fails {
            type SinkError = std::io::Error;
        }
        impl Service<DispatchEvent> for Fails {
            type Response = ();
            type Error = std::io::Error;
            type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }
            fn call(&mut self, _req: DispatchEvent) -> Self::Future {
                Box::pin(async { Err(std::io::Error::other("fail")) })
            }
        }

        emit_best_effort(Fails, sent("x", 1)).await;
    }

    #[test]
    fn bundled_sinks_are_accepted_by_the_handler_builder() {
        fn accepts<S: TelemetrySink<SinkError = Infallible>>(_sink: S) {}
        accepts(NullSink);
        accepts(LogSink);
        accepts(MemorySink::new());
    }

    #[test]
    fn display_names_the_route() {
        let event = DispatchEvent::RateLimited {
            route: "POST /channels/1/messages".into(),
            retry_after: Duration::from_millis(250),
            global: true,
        };
        let text = event.to_string();
        assert!(text.starts_with("RateLimited(POST /channels/1/messages"));
        assert!(text.contains("global=true"));
        assert_eq!(event.route(), "POST /channels/1/messages");
    }

    #[tokio::test]
    async fn log_sink_accepts_events() {
        let mut sink = LogSink;
        sink.call(DispatchEvent::WorkerRetired { route: "GET /users/@me".into() }).await.unwrap();
    }
}
