//! Monotonic and wall-clock time sources for timing capture
//!
//! All `*_perf_ns` fields in records come from a process-wide monotonic
//! clock so that differences between them are meaningful even across
//! services; wall-clock stamps are taken separately for export.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Process-wide monotonic clock with a fixed origin.
///
/// Cloning is cheap; all clones share the same origin so readings taken
/// by different services are directly comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the clock origin.
    pub fn perf_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// The instant corresponding to `perf_ns` nanoseconds after the origin.
    pub fn instant_at(&self, perf_ns: u64) -> Instant {
        self.origin + Duration::from_nanos(perf_ns)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const MILLIS_PER_SECOND: u64 = 1_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perf_ns_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.perf_ns();
        let b = clock.perf_ns();
        assert!(b >= a);
    }

    #[test]
    fn clones_share_origin() {
        let clock = MonotonicClock::new();
        let other = clock;
        let a = clock.perf_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = other.perf_ns();
        assert!(b > a);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        // 2020-01-01 in nanoseconds.
        assert!(wall_clock_ns() > 1_577_836_800 * NANOS_PER_SECOND);
    }
}
