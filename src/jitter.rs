//! Jitter for transient-failure backoff.
//!
//! Many bucket workers hitting the same failing upstream would otherwise retry in lockstep.
//! `Full` spreads a delay uniformly over `[0, delay]`; `Equal` keeps a floor of `delay / 2`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied on top of a [`crate::Backoff`] delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the backoff delay as-is.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Randomize `delay` with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        assert_eq!(Jitter::None.apply(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn full_jitter_stays_within_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(Jitter::full().apply_with_rng(Duration::from_secs(1), &mut rng) <= Duration::from_secs(1));
        }
    }

    #[test]
    fn equal_jitter_keeps_half_floor() {
        for _ in 0..100 {
            let jittered = Jitter::equal().apply(Duration::from_millis(1_000));
            assert!(jittered >= Duration::from_millis(500));
            assert!(jittered <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::equal().apply(Duration::ZERO), Duration::ZERO);
    }
}
