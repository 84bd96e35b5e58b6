use super::Bucket;
use crate::adaptive::DynamicConfig;
use crate::{Clock, Sleeper};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Gate raised when the server signals a global rate limit.
///
/// Holds a single resume deadline (local clock millis). Once the deadline passes the lock
/// clears itself on the next check.
#[derive(Debug, Default)]
pub struct GlobalLock {
    deadline: Mutex<Option<u64>>,
}

impl GlobalLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halt dispatch until `deadline`. An earlier deadline never shortens an active lock.
    pub fn lock_until(&self, deadline: u64) {
        let mut current = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        *current = Some(current.map_or(deadline, |d| d.max(deadline)));
    }

    pub fn is_locked(&self, now: u64) -> bool {
        self.wait_time(now).is_some()
    }

    /// Deadline and remaining wait while locked; clears an expired lock.
    pub fn wait_time(&self, now: u64) -> Option<(u64, Duration)> {
        let mut current = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        match *current {
            Some(deadline) if now < deadline => Some((deadline, Duration::from_millis(deadline - now))),
            Some(_) => {
                *current = None;
                None
            }
            None => None,
        }
    }

    /// Clear the lock if it still ends at `deadline`; a lock extended meanwhile stays.
    pub fn clear_if(&self, deadline: u64) -> bool {
        let mut current = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == Some(deadline) {
            *current = None;
            true
        } else {
            false
        }
    }
}

/// Everything global a request must pass before it may consult its own bucket.
///
/// Combines the reactive [`GlobalLock`] with a proactive budget of at most
/// `requests_per_second` requests per one-second window across all routes. `None`
/// disables the proactive budget.
#[derive(Debug)]
pub struct GlobalGate {
    lock: GlobalLock,
    requests_per_second: DynamicConfig<Option<u32>>,
    window: Mutex<Option<Bucket>>,
}

impl GlobalGate {
    pub fn new(requests_per_second: DynamicConfig<Option<u32>>) -> Self {
        Self { lock: GlobalLock::new(), requests_per_second, window: Mutex::new(None) }
    }

    pub fn lock(&self) -> &GlobalLock {
        &self.lock
    }

    /// Wait until no global lock is active.
    pub async fn wait_unlocked(&self, clock: &dyn Clock, sleeper: &dyn Sleeper) {
        while let Some((deadline, wait)) = self.lock.wait_time(clock.now_millis()) {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting for global rate limit");
            sleeper.sleep(wait).await;
            self.lock.clear_if(deadline);
        }
    }

    /// Take one slot of the proactive budget, or return the window reset and wait.
    pub fn try_acquire(&self, now: u64) -> Result<(), (u64, Duration)> {
        let Some(per_second) = self.requests_per_second.value() else {
            return Ok(());
        };
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.as_ref().is_some_and(|b| b.limit != per_second) {
            *window = None;
        }
        let bucket =
            window.get_or_insert_with(|| Bucket::window(per_second, Duration::from_secs(1)));
        if let Some(wait) = bucket.wait_time(now) {
            return Err((bucket.reset_at, wait));
        }
        bucket.consume(now);
        Ok(())
    }

    /// Start a new window after waiting for the one ending at `reset_at`; only the first
    /// waiter for that window refreshes it.
    pub fn refresh_after_wait(&self, reset_at: u64, now: u64) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = window.as_mut().filter(|b| b.reset_at == reset_at) {
            bucket.refresh(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sleeper::TrackingSleeper;

    #[test]
    fn lock_blocks_until_deadline_then_clears() {
        let lock = GlobalLock::new();
        assert!(!lock.is_locked(0));
        lock.lock_until(1_000);
        assert!(lock.is_locked(500));
        assert_eq!(lock.wait_time(400), Some((1_000, Duration::from_millis(600))));
        assert!(!lock.is_locked(1_000));
        assert!(lock.wait_time(0).is_none(), "expired lock must be cleared");
    }

    #[test]
    fn earlier_deadline_does_not_shorten_lock() {
        let lock = GlobalLock::new();
        lock.lock_until(2_000);
        lock.lock_until(1_000);
        assert!(lock.is_locked(1_500));
        assert!(!lock.clear_if(1_000));
        assert!(lock.clear_if(2_000));
        assert!(!lock.is_locked(0));
    }

    #[tokio::test]
    async fn wait_unlocked_sleeps_for_remaining_lock() {
        let gate = GlobalGate::new(DynamicConfig::new(None));
        let clock = ManualClock::new(100);
        let sleeper = TrackingSleeper::driving(clock.clone());

        gate.lock().lock_until(1_100);
        gate.wait_unlocked(&clock, &sleeper).await;

        assert_eq!(sleeper.calls(), vec![Duration::from_millis(1_000)]);
        assert_eq!(clock.now_millis(), 1_100);
        assert!(!gate.lock().is_locked(clock.now_millis()));
    }

    #[test]
    fn proactive_budget_limits_requests_per_window() {
        let gate = GlobalGate::new(DynamicConfig::new(Some(2)));
        assert!(gate.try_acquire(0).is_ok());
        assert!(gate.try_acquire(10).is_ok());
        let (reset_at, wait) = gate.try_acquire(20).unwrap_err();
        assert_eq!(reset_at, 1_000);
        assert_eq!(wait, Duration::from_millis(980));

        gate.refresh_after_wait(reset_at, 20);
        assert!(gate.try_acquire(20).is_ok());
        assert!(gate.try_acquire(1_500).is_ok());
    }

    #[test]
    fn only_first_waiter_refreshes_window() {
        let gate = GlobalGate::new(DynamicConfig::new(Some(1)));
        gate.try_acquire(0).unwrap();
        let (reset_at, _) = gate.try_acquire(0).unwrap_err();

        gate.refresh_after_wait(reset_at, 1_000);
        gate.refresh_after_wait(reset_at, 1_000);
        assert!(gate.try_acquire(1_000).is_ok());
        assert!(gate.try_acquire(1_000).is_err());
    }

    #[test]
    fn disabled_budget_always_allows() {
        let rate = DynamicConfig::new(None);
        let gate = GlobalGate::new(rate.clone());
        for _ in 0..1_000 {
            assert!(gate.try_acquire(0).is_ok());
        }
        rate.set(Some(1));
        assert!(gate.try_acquire(0).is_ok());
        assert!(gate.try_acquire(0).is_err());
    }
}
