//! Forced request cancellation
//!
//! When configured, each issued credit is marked for cancellation with
//! the configured probability (0-100 percent); the worker honors the
//! mark by abandoning the in-flight response after the delay. Decisions
//! come from a seed-derived generator, so equal seeds give equal
//! decision sequences.

use rand::rngs::StdRng;
use rand::Rng;

use crate::clock::NANOS_PER_MILLI;
use crate::config::CancellationConfig;

pub struct RequestCancellationStrategy {
    rate_percent: f64,
    delay_ns: u64,
    rng: StdRng,
}

impl RequestCancellationStrategy {
    pub fn new(config: Option<CancellationConfig>, rng: StdRng) -> Self {
        match config {
            Some(config) => Self {
                rate_percent: config.rate.into_inner(),
                delay_ns: config.delay_ms * NANOS_PER_MILLI,
                rng,
            },
            None => Self {
                rate_percent: 0.0,
                delay_ns: 0,
                rng,
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.rate_percent > 0.0
    }

    /// Decides whether the next credit is marked for cancellation.
    pub fn should_cancel(&mut self) -> bool {
        if self.rate_percent <= 0.0 {
            return false;
        }
        if self.rate_percent >= 100.0 {
            return true;
        }
        self.rng.gen_range(0.0..100.0) < self.rate_percent
    }

    pub fn delay_ns(&self) -> u64 {
        self.delay_ns
    }

    /// The cancellation mark for the next credit, if any.
    pub fn next_mark(&mut self) -> Option<u64> {
        if self.is_enabled() && self.should_cancel() {
            Some(self.delay_ns)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::CancellationRate;
    use crate::rng::RootRng;

    fn strategy(rate: f64, seed: u64) -> RequestCancellationStrategy {
        RequestCancellationStrategy::new(
            Some(CancellationConfig {
                rate: CancellationRate::try_new(rate).unwrap(),
                delay_ms: 2_000,
            }),
            RootRng::new(Some(seed)).child("cancellation"),
        )
    }

    #[test]
    fn disabled_by_default() {
        let mut s =
            RequestCancellationStrategy::new(None, RootRng::new(Some(1)).child("cancellation"));
        assert!(!s.is_enabled());
        assert!(!s.should_cancel());
        assert_eq!(s.delay_ns(), 0);
    }

    #[test]
    fn enabled_with_parameters() {
        let s = strategy(50.0, 42);
        assert!(s.is_enabled());
        assert_eq!(s.delay_ns(), 2_000_000_000);
    }

    #[test]
    fn decisions_are_deterministic_per_seed() {
        let mut a = strategy(50.0, 42);
        let mut b = strategy(50.0, 42);
        let decisions_a: Vec<bool> = (0..100).map(|_| a.should_cancel()).collect();
        let decisions_b: Vec<bool> = (0..100).map(|_| b.should_cancel()).collect();
        assert_eq!(decisions_a, decisions_b);

        let hits = decisions_a.iter().filter(|d| **d).count();
        assert!((30..=70).contains(&hits), "rate far off 50%: {hits}");
    }

    #[test]
    fn zero_rate_never_cancels() {
        let mut s = strategy(0.0, 7);
        assert!((0..100).all(|_| !s.should_cancel()));
    }

    #[test]
    fn full_rate_always_cancels() {
        let mut s = strategy(100.0, 7);
        assert!((0..100).all(|_| s.should_cancel()));
    }
}
