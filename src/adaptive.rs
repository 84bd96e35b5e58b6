//! Live-tunable settings for a running [`crate::RequestHandler`].
//!
//! The retry limit and the proactive global request rate can be changed while bucket
//! workers are running; workers read a fresh snapshot for every request. Default backend
//! is `ArcSwap`; feature `adaptive-rwlock` switches to `RwLock`.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::{PoisonError, RwLock};

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared, cheaply readable value that can be replaced at runtime.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(value)) }
        }
    }

    /// Snapshot the current value.
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Snapshot the current value.
    #[cfg(feature = "adaptive-rwlock")]
    pub fn get(&self) -> Arc<T>
    where
        T: Clone,
    {
        Arc::new(self.inner.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
        }
    }
}

impl<T: Copy> DynamicConfig<T> {
    /// Read a `Copy` value without holding the snapshot.
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn value(&self) -> T {
        **self.inner.load()
    }

    /// Read a `Copy` value without holding the snapshot.
    #[cfg(feature = "adaptive-rwlock")]
    pub fn value(&self) -> T {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
