//! One FIFO queue and one worker task per bucket key.
//!
//! Jobs for the same key run strictly one after another, in enqueue order; a job that
//! retries holds its place at the head. Different keys have different workers and run in
//! parallel. Workers are spawned on first use and retire after staying idle for
//! `idle_timeout`; retiring and enqueueing synchronize on the same map lock, so a job is
//! never left behind in a queue whose worker has gone.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Executes the jobs of one bucket.
#[async_trait]
pub trait BucketWorker: Send + Sync + 'static {
    type Job: Send + 'static;

    /// Run one job to completion (including its retries).
    async fn run(&self, key: &str, job: Self::Job);

    /// Called once after the worker for `key` has deregistered.
    async fn retired(&self, _key: &str) {}
}

type Senders<J> = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<J>>>>;

/// Per-key job queues sharing one [`BucketWorker`].
pub struct BucketQueues<W: BucketWorker> {
    worker: Arc<W>,
    senders: Senders<W::Job>,
    idle_timeout: Duration,
}

impl<W: BucketWorker> Clone for BucketQueues<W> {
    fn clone(&self) -> Self {
        Self { worker: self.worker.clone(), senders: self.senders.clone(), idle_timeout: self.idle_timeout }
    }
}

impl<W: BucketWorker> fmt::Debug for BucketQueues<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketQueues")
            .field("active_workers", &self.active_workers())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

fn lock<J>(senders: &Senders<J>) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<J>>> {
    senders.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<W: BucketWorker> BucketQueues<W> {
    pub fn new(worker: Arc<W>, idle_timeout: Duration) -> Self {
        Self { worker, senders: Arc::new(Mutex::new(HashMap::new())), idle_timeout }
    }

    /// Append `job` to the queue for `key`, starting a worker if none is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, key: &str, job: W::Job) {
        let mut senders = lock(&self.senders);
        let job = match senders.get(key) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                // worker died without deregistering (panicked job); replace it
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        senders.insert(key.to_owned(), tx);
        tracing::debug!(key, "starting bucket worker");

        tokio::spawn(work(
            self.worker.clone(),
            self.senders.clone(),
            key.to_owned(),
            rx,
            self.idle_timeout,
        ));
    }

    /// Number of keys with a live worker.
    pub fn active_workers(&self) -> usize {
        lock(&self.senders).len()
    }

    pub fn is_active(&self, key: &str) -> bool {
        lock(&self.senders).contains_key(key)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

async fn work<W: BucketWorker>(
    worker: Arc<W>,
    senders: Senders<W::Job>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<W::Job>,
    idle_timeout: Duration,
) {
    loop {
        let job = match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                let next = {
                    let mut map = lock(&senders);
                    match rx.try_recv() {
                        Ok(job) => Some(job),
                        Err(_) => {
                            map.remove(&key);
                            None
                        }
                    }
                };
                match next {
                    Some(job) => job,
                    None => break,
                }
            }
        };
        worker.run(&key, job).await;
    }
    tracing::debug!(key = %key, "bucket worker retired");
    worker.retired(&key).await;
}
