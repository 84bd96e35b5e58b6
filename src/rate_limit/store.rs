use super::{Bucket, RateLimitHeaders};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Storage for bucket state, keyed by route key.
///
/// Injected into [`crate::RequestHandler`] rather than held in a process-wide singleton, so
/// tests (and multi-tenant applications) get isolated state per handler. The async
/// signature leaves room for shared backends; the in-memory store never actually awaits.
#[async_trait]
pub trait BucketStore: Send + Sync + std::fmt::Debug {
    /// Current state for `key`; `None` means no headers observed yet (optimistic pass).
    async fn get(&self, key: &str) -> Option<Bucket>;

    /// Overwrite the state for `key`.
    async fn put(&self, key: &str, bucket: Bucket);

    async fn remove(&self, key: &str);

    async fn clear(&self);

    /// Apply the rate-limit headers of a response received at local clock `now`.
    ///
    /// Headers are absolute, so this overwrites rather than decrements; a duplicate
    /// response leaves the bucket exactly as a single one would. Returns the stored bucket,
    /// or `None` when the headers carried no bucket information.
    async fn update(
        &self,
        key: &str,
        headers: &RateLimitHeaders,
        now: u64,
        unix_now_millis: u64,
    ) -> Option<Bucket> {
        let bucket = Bucket::from_headers(headers, now, unix_now_millis)?;
        self.put(key, bucket.clone()).await;
        Some(bucket)
    }
}

/// Default store: a mutex-guarded map shared by clones.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBucketStore {
    data: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets with observed state.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bucket>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn get(&self, key: &str) -> Option<Bucket> {
        self.lock().get(key).cloned()
    }

    async fn put(&self, key: &str, bucket: Bucket) {
        self.lock().insert(key.to_owned(), bucket);
    }

    async fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    async fn clear(&self) {
        self.lock().clear();
    }
}
