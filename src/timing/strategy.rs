//! Timing strategy seam
//!
//! A strategy decides *when* credits are issued; the phase driver owns
//! everything else: sampling, cancellation marks, queue pushes, return
//! accounting, progress reporting, and phase terminators. Strategies are
//! built from one construction table keyed by the timing mode.

use async_trait::async_trait;
use rand::rngs::StdRng;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::bus::{BusError, WorkQueue};
use crate::clock::MonotonicClock;
use crate::config::{LoadGenConfig, TimingMode};
use crate::dataset::model::TimingScheduleEntry;
use crate::dataset::samplers::ConversationSampler;
use crate::domain_types::ConversationId;
use crate::messages::{
    BusMessage, CreditDrop, CreditPhase, CreditPhaseProgress, CreditReturn, Message,
};
use crate::service::EventPublisher;
use crate::timing::cancellation::RequestCancellationStrategy;
use crate::timing::phase::{CreditPhaseStats, PhaseConfig};

use super::concurrency::ConcurrencyStrategy;
use super::fixed_schedule::FixedScheduleStrategy;
use super::request_rate::RequestRateStrategy;

/// Scheduler failures.
#[derive(Debug, Error)]
pub enum TimingError {
    #[error("no schedule loaded for fixed-schedule mode")]
    EmptySchedule,

    #[error("request rate is required in request-rate mode")]
    MissingRate,

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Outcome of waiting for a credit return.
#[derive(Debug)]
pub enum ReturnEvent {
    Return(CreditReturn),
    /// The phase duration deadline fired.
    Deadline,
    /// The run was cancelled.
    Cancelled,
    /// The return channel closed.
    Closed,
}

/// Drives one phase on behalf of a strategy.
pub struct PhaseDriver<'a> {
    pub stats: &'a mut CreditPhaseStats,
    config: &'a PhaseConfig,
    queue: &'a WorkQueue,
    publisher: &'a EventPublisher,
    sampler: &'a mut dyn ConversationSampler,
    cancellation: &'a mut RequestCancellationStrategy,
    returns: &'a mut mpsc::UnboundedReceiver<CreditReturn>,
    cancel_rx: watch::Receiver<bool>,
    clock: MonotonicClock,
    deadline_ns: Option<u64>,
    last_progress: Instant,
    progress_interval: Duration,
}

impl<'a> PhaseDriver<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stats: &'a mut CreditPhaseStats,
        config: &'a PhaseConfig,
        queue: &'a WorkQueue,
        publisher: &'a EventPublisher,
        sampler: &'a mut dyn ConversationSampler,
        cancellation: &'a mut RequestCancellationStrategy,
        returns: &'a mut mpsc::UnboundedReceiver<CreditReturn>,
        cancel_rx: watch::Receiver<bool>,
        clock: MonotonicClock,
        progress_interval: Duration,
    ) -> Self {
        let deadline_ns = config
            .duration
            .map(|duration| stats.start_ns + duration.as_nanos() as u64);
        Self {
            stats,
            config,
            queue,
            publisher,
            sampler,
            cancellation,
            returns,
            cancel_rx,
            clock,
            deadline_ns,
            last_progress: Instant::now(),
            progress_interval,
        }
    }

    pub fn phase(&self) -> CreditPhase {
        self.stats.phase
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.perf_ns()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Whether the phase terminator has fired (or the run was
    /// cancelled): no further credits may be issued.
    pub fn sending_done(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        if let Some(total) = self.config.total_expected {
            if self.stats.sent >= total {
                return true;
            }
        }
        if let Some(deadline) = self.deadline_ns {
            if self.now_ns() >= deadline {
                return true;
            }
        }
        false
    }

    /// Issues a credit for the sampler's next conversation.
    pub fn issue_sampled(&mut self, credit_drop_ns: Option<u64>) -> Result<(), TimingError> {
        let conversation_id = self.sampler.next_id();
        self.issue_to(conversation_id, 0, credit_drop_ns)
    }

    /// Issues a credit for a specific conversation turn.
    pub fn issue_to(
        &mut self,
        conversation_id: ConversationId,
        turn_index: usize,
        credit_drop_ns: Option<u64>,
    ) -> Result<(), TimingError> {
        let cancel_after_ns = self.cancellation.next_mark();
        let drop = CreditDrop {
            phase: self.stats.phase,
            conversation_id,
            turn_index,
            credit_drop_ns,
            cancel_after_ns,
        };
        self.queue.push(BusMessage::new(
            self.publisher.service_id().clone(),
            Message::CreditDrop(drop),
        ))?;
        self.stats.sent += 1;
        self.maybe_publish_progress();
        Ok(())
    }

    /// Waits for the next credit return, the phase deadline, or
    /// cancellation, whichever comes first. Returns from a previous
    /// phase are discarded, not counted.
    pub async fn wait_return(&mut self) -> ReturnEvent {
        let deadline = self.deadline_ns.map(|ns| self.clock.instant_at(ns));
        loop {
            tokio::select! {
                credit = self.returns.recv() => {
                    return match credit {
                        Some(credit) => {
                            if credit.phase != self.stats.phase {
                                continue;
                            }
                            self.stats.completed += 1;
                            self.maybe_publish_progress();
                            ReturnEvent::Return(credit)
                        }
                        None => ReturnEvent::Closed,
                    };
                }
                changed = self.cancel_rx.changed() => {
                    if changed.is_err() || *self.cancel_rx.borrow() {
                        return ReturnEvent::Cancelled;
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    return ReturnEvent::Deadline;
                }
            }
        }
    }

    /// Sleeps until the target monotonic time, folding in any returns
    /// that arrive meanwhile. Returns `false` if the run was cancelled.
    pub async fn sleep_until_ns(&mut self, target_ns: u64) -> bool {
        let target = self.clock.instant_at(target_ns);
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(target)) => {
                    return true;
                }
                credit = self.returns.recv() => {
                    if credit.is_some_and(|c| c.phase == self.stats.phase) {
                        self.stats.completed += 1;
                        self.maybe_publish_progress();
                    }
                }
                changed = self.cancel_rx.changed() => {
                    if changed.is_err() || *self.cancel_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    fn maybe_publish_progress(&mut self) {
        if self.last_progress.elapsed() < self.progress_interval {
            return;
        }
        self.last_progress = Instant::now();
        let _ = self
            .publisher
            .publish(Message::CreditPhaseProgress(CreditPhaseProgress {
                phase: self.stats.phase,
                sent: self.stats.sent,
                completed: self.stats.completed,
            }));
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}

/// A credit issuing algorithm. Exactly one is active per run.
#[async_trait]
pub trait TimingStrategy: Send + Sync {
    /// Issues this phase's credits. Returns once sending is complete
    /// (terminator fired or run cancelled); the manager then waits out
    /// the remaining returns.
    async fn run_phase(&mut self, driver: &mut PhaseDriver<'_>) -> Result<(), TimingError>;
}

/// Construction table: timing mode to strategy. Runs at configure time;
/// there is no runtime registry.
pub fn build_strategy(
    loadgen: &LoadGenConfig,
    schedule: &[TimingScheduleEntry],
    arrival_rng: StdRng,
) -> Result<Box<dyn TimingStrategy>, TimingError> {
    match loadgen.timing_mode {
        TimingMode::Concurrency => Ok(Box::new(ConcurrencyStrategy::new(
            loadgen.concurrency.as_usize(),
        ))),
        TimingMode::RequestRate => {
            let rate = loadgen.request_rate.ok_or(TimingError::MissingRate)?;
            Ok(Box::new(RequestRateStrategy::new(
                rate.as_f64(),
                loadgen.arrival,
                arrival_rng,
            )))
        }
        TimingMode::FixedSchedule => Ok(Box::new(FixedScheduleStrategy::new(
            loadgen.auto_offset_timestamps,
            loadgen.fixed_schedule_start_offset_ms,
            schedule,
        )?)),
    }
}
