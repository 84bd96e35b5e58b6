#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketline
//!
//! Rate-limit-aware REST dispatcher for chat-platform HTTP APIs.
//!
//! ## Features
//!
//! - **Per-route buckets** keyed by method, route template and major parameter
//! - **FIFO queue per bucket**, parallel across buckets
//! - **Global lock** on global 429s plus a proactive requests-per-second budget
//! - **Bounded retries** for 429, 5xx, network errors and timeouts
//! - **JSON and multipart bodies** (`payload_json` + `files[n]`)
//! - **Thin resource facades** with local validation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bucketline::{Api, ApiRequest, RequestHandler, RestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = RequestHandler::new(RestConfig::new("my-bot-token"))?;
//!
//!     // Straight through the dispatcher...
//!     let me = handler.request_json::<serde_json::Value>(ApiRequest::get("/users/@me")).await?;
//!     println!("logged in as {}", me["username"]);
//!
//!     // ...or through a facade.
//!     let api = Api::new(handler);
//!     api.channels().create_message(81384788765712384, "hello").await?;
//!     Ok(())
//! }
//! ```

pub mod adaptive;
pub mod api;
pub mod backoff;
pub mod body;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod jitter;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod route;
pub mod sleeper;
pub mod snowflake;
pub mod telemetry;
pub mod timeout;
pub mod transport;

// Re-exports
pub use adaptive::DynamicConfig;
pub use api::{Api, MessagePayload};
pub use backoff::Backoff;
pub use body::{FileAttachment, RequestBody};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, RestConfig};
pub use error::{ApiError, ErrorCategory, Failure, RequestError, ValidationError};
pub use handler::{ApiRequest, ApiResponse, RequestHandler, RequestHandlerBuilder};
pub use jitter::Jitter;
pub use rate_limit::{Bucket, BucketStore, GlobalLock, InMemoryBucketStore};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use route::{Route, RouteKeyResolver};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::TimeoutPolicy;
pub use transport::{MockTransport, ReqwestTransport, Transport, TransportResponse};
