//! Handler configuration.
//!
//! [`RestConfig`] can be built in code or deserialized from JSON; missing fields take their
//! defaults and durations are given in milliseconds:
//!
//! ```rust
//! use bucketline::RestConfig;
//! use std::time::Duration;
//!
//! let config = RestConfig::from_json_str(
//!     r#"{ "token": "abc", "max_attempts": 5, "request_timeout_ms": 2000 }"#,
//! )
//! .unwrap();
//! assert_eq!(config.max_attempts, 5);
//! assert_eq!(config.request_timeout, Duration::from_secs(2));
//! assert_eq!(config.global_requests_per_second, Some(50));
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::retry::BuildError;
use crate::route::{RouteKeyResolver, DEFAULT_MAJOR_PARAMETERS};
use crate::timeout::{InvalidTimeout, TimeoutPolicy};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_USER_AGENT: &str =
    concat!("DiscordBot (https://github.com/flyingrobots/bucketline, ", env!("CARGO_PKG_VERSION"), ")");

/// Configuration rejected by [`RestConfig::validate`] or while parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error(transparent)]
    Retry(#[from] BuildError),
    #[error(transparent)]
    Timeout(#[from] InvalidTimeout),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error("global_requests_per_second must be > 0 when set")]
    ZeroGlobalRate,
    #[error("worker_idle_timeout must be > 0")]
    ZeroIdleTimeout,
    #[error("invalid value for header {0}")]
    Header(&'static str),
}

/// Everything a [`crate::RequestHandler`] needs besides its collaborators.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Bot token; sent as `Authorization: {token_prefix} {token}`. Empty sends no header.
    pub token: String,
    pub token_prefix: String,
    pub base_url: String,
    pub user_agent: String,
    /// Total attempts per request (initial try + retries).
    pub max_attempts: usize,
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Proactive cap on requests per second across all routes; `None` disables it.
    pub global_requests_per_second: Option<u32>,
    /// Resources whose ids partition rate-limit buckets.
    pub major_parameters: Vec<String>,
    #[serde(rename = "backoff_base_ms", with = "millis")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_max_ms", with = "millis")]
    pub backoff_max: Duration,
    /// How long a bucket worker waits for new work before shutting down.
    #[serde(rename = "worker_idle_timeout_ms", with = "millis")]
    pub worker_idle_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            token_prefix: "Bot".to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_attempts: 3,
            request_timeout: Duration::from_secs(15),
            global_requests_per_second: Some(50),
            major_parameters: DEFAULT_MAJOR_PARAMETERS.iter().map(|s| (*s).to_owned()).collect(),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
            worker_idle_timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("RestConfig")
            .field("token", &token)
            .field("token_prefix", &self.token_prefix)
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("max_attempts", &self.max_attempts)
            .field("request_timeout", &self.request_timeout)
            .field("global_requests_per_second", &self.global_requests_per_second)
            .field("major_parameters", &self.major_parameters)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("worker_idle_timeout", &self.worker_idle_timeout)
            .finish()
    }
}

impl RestConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), ..Self::default() }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_prefix = prefix.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_global_requests_per_second(mut self, limit: Option<u32>) -> Self {
        self.global_requests_per_second = limit;
        self
    }

    pub fn with_major_parameters<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.major_parameters = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_worker_idle_timeout(mut self, idle: Duration) -> Self {
        self.worker_idle_timeout = idle;
        self
    }

    /// Check every field that can make the handler misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_base_url()?;
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0).into());
        }
        self.timeout_policy()?;
        self.backoff()?;
        if self.global_requests_per_second == Some(0) {
            return Err(ConfigError::ZeroGlobalRate);
        }
        if self.worker_idle_timeout.is_zero() {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        Ok(())
    }

    /// Base URL with a trailing slash, ready for `Url::join`.
    pub fn parsed_base_url(&self) -> Result<Url, url::ParseError> {
        let trimmed = self.base_url.trim_end_matches('/');
        Url::parse(&format!("{trimmed}/"))
    }

    pub fn backoff(&self) -> Result<Backoff, BackoffError> {
        Backoff::exponential(self.backoff_base).with_max(self.backoff_max)
    }

    pub fn timeout_policy(&self) -> Result<TimeoutPolicy, InvalidTimeout> {
        TimeoutPolicy::new(self.request_timeout)
    }

    pub fn resolver(&self) -> RouteKeyResolver {
        RouteKeyResolver::new(self.major_parameters.iter().cloned())
    }

    /// Value of the `Authorization` header, if a token is configured.
    pub fn authorization(&self) -> Option<String> {
        match (self.token.is_empty(), self.token_prefix.is_empty()) {
            (true, _) => None,
            (false, true) => Some(self.token.clone()),
            (false, false) => Some(format!("{} {}", self.token_prefix, self.token)),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
