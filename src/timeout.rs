//! Per-attempt timeout around a single transport exchange.

use crate::error::Failure;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Rejected timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timeout must be non-zero and finite (got {0:?})")]
pub struct InvalidTimeout(pub Duration);

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Result<Self, InvalidTimeout> {
        if duration.is_zero() || duration == Duration::MAX {
            return Err(InvalidTimeout(duration));
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `attempt`, mapping an overrun to [`Failure::Timeout`]. The attempt future is
    /// dropped on overrun.
    pub async fn execute<T, Fut>(&self, attempt: Fut) -> Result<T, Failure>
    where
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        tokio::time::timeout(self.duration, attempt)
            .await
            .map_err(|_| Failure::Timeout { elapsed: start.elapsed(), timeout: self.duration })
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: Duration::from_secs(15) }
    }
}
