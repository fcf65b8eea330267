//! Credit phase model
//!
//! A run is one or two phases (warmup then profiling), each bounded by a
//! request count or a duration. The stats struct is the single source of
//! truth for the `sent = completed + outstanding + lost` accounting.

use std::time::Duration;

use crate::config::{LoadGenConfig, TimingMode};
use crate::messages::CreditPhase;

/// Terminator and grace settings for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseConfig {
    pub phase: CreditPhase,
    /// Request-count terminator.
    pub total_expected: Option<u64>,
    /// Duration terminator.
    pub duration: Option<Duration>,
    /// How long to wait for outstanding returns after sending completes.
    pub grace_period: Duration,
}

/// Derives the ordered phase plan from the load-generation config.
/// `schedule_len` is the fixed schedule's entry count, when one exists.
pub fn phase_plan(loadgen: &LoadGenConfig, schedule_len: Option<u64>) -> Vec<PhaseConfig> {
    let grace_period = Duration::from_millis(loadgen.grace_period_ms);
    let mut phases = Vec::with_capacity(2);

    if loadgen.timing_mode == TimingMode::FixedSchedule {
        // Fixed schedules run a single profiling phase sized by the
        // schedule itself.
        phases.push(PhaseConfig {
            phase: CreditPhase::Profiling,
            total_expected: schedule_len,
            duration: None,
            grace_period,
        });
        return phases;
    }

    let warmup_count = loadgen.warmup_request_count.filter(|count| *count > 0);
    let warmup_duration = loadgen.warmup_duration_ms.filter(|ms| *ms > 0);
    if warmup_count.is_some() || warmup_duration.is_some() {
        phases.push(PhaseConfig {
            phase: CreditPhase::Warmup,
            total_expected: warmup_count,
            duration: warmup_duration.map(Duration::from_millis),
            grace_period,
        });
    }

    phases.push(PhaseConfig {
        phase: CreditPhase::Profiling,
        total_expected: loadgen.request_count,
        duration: loadgen.duration_ms.map(Duration::from_millis),
        grace_period,
    });

    phases
}

/// Running counters for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditPhaseStats {
    pub phase: CreditPhase,
    pub total_expected: Option<u64>,
    pub sent: u64,
    pub completed: u64,
    /// Credits written off as lost (e.g. a crashed worker) when the
    /// grace period expired.
    pub errors: u64,
    pub start_ns: u64,
    pub sent_end_ns: Option<u64>,
    pub end_ns: Option<u64>,
    pub cancelled: bool,
}

impl CreditPhaseStats {
    pub fn new(phase: CreditPhase, total_expected: Option<u64>, start_ns: u64) -> Self {
        Self {
            phase,
            total_expected,
            sent: 0,
            completed: 0,
            errors: 0,
            start_ns,
            sent_end_ns: None,
            end_ns: None,
            cancelled: false,
        }
    }

    /// Credits issued but not yet returned or written off.
    pub fn outstanding(&self) -> u64 {
        self.sent.saturating_sub(self.completed + self.errors)
    }

    /// Fraction complete: against the expected total when known, else
    /// against what has been sent.
    pub fn progress(&self) -> f64 {
        let denominator = self.total_expected.unwrap_or(self.sent);
        if denominator == 0 {
            0.0
        } else {
            self.completed as f64 / denominator as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArrivalPattern, SamplerKind};
    use crate::domain_types::ConcurrencyLimit;

    fn loadgen(mode: TimingMode) -> LoadGenConfig {
        LoadGenConfig {
            timing_mode: mode,
            concurrency: ConcurrencyLimit::try_new(1).unwrap(),
            request_rate: None,
            arrival: ArrivalPattern::Poisson,
            warmup_request_count: None,
            warmup_duration_ms: None,
            request_count: Some(5),
            duration_ms: None,
            grace_period_ms: 1_000,
            auto_offset_timestamps: false,
            fixed_schedule_start_offset_ms: None,
            sampler: SamplerKind::Sequential,
            random_seed: None,
            cancellation: None,
        }
    }

    #[test]
    fn warmup_phase_is_included_when_configured() {
        let mut config = loadgen(TimingMode::Concurrency);
        config.warmup_request_count = Some(2);
        let plan = phase_plan(&config, None);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].phase, CreditPhase::Warmup);
        assert_eq!(plan[0].total_expected, Some(2));
        assert_eq!(plan[1].phase, CreditPhase::Profiling);
        assert_eq!(plan[1].total_expected, Some(5));
    }

    #[test]
    fn zero_warmup_is_skipped() {
        let mut config = loadgen(TimingMode::Concurrency);
        config.warmup_request_count = Some(0);
        let plan = phase_plan(&config, None);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].phase, CreditPhase::Profiling);
    }

    #[test]
    fn fixed_schedule_has_single_phase_sized_by_schedule() {
        let plan = phase_plan(&loadgen(TimingMode::FixedSchedule), Some(4));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].total_expected, Some(4));
    }

    #[test]
    fn progress_falls_back_to_sent_when_total_unknown() {
        let mut stats = CreditPhaseStats::new(CreditPhase::Profiling, None, 1);
        stats.sent = 4;
        stats.completed = 2;
        assert!((stats.progress() - 0.5).abs() < f64::EPSILON);

        let mut counted = CreditPhaseStats::new(CreditPhase::Profiling, Some(10), 1);
        counted.sent = 4;
        counted.completed = 2;
        assert!((counted.progress() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn outstanding_accounts_for_errors() {
        let mut stats = CreditPhaseStats::new(CreditPhase::Profiling, Some(10), 1);
        stats.sent = 8;
        stats.completed = 5;
        stats.errors = 2;
        assert_eq!(stats.outstanding(), 1);
    }
}
