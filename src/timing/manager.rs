//! Timing manager service
//!
//! Drives the credit phases: builds the configured strategy, issues
//! credits through the load-balanced queue, accounts every return, and
//! emits the phase lifecycle messages in order. Phase messages per phase
//! are totally ordered: Start, Progress*, SendingComplete, Complete.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::bus::{CommandDelivery, WorkQueue};
use crate::clock::MonotonicClock;
use crate::config::{TimingMode, UserConfig};
use crate::dataset::samplers::{build_sampler, ConversationSampler};
use crate::dataset::{model::TimingScheduleEntry, LoadedDataset};
use crate::domain_types::ServiceId;
use crate::messages::{
    BusMessage, Command, CommandKind, CommandResponse, CreditPhaseComplete, CreditPhaseProgress,
    CreditPhaseSendingComplete, CreditPhaseStart, CreditReturn, DatasetTimingResponse, Message,
    MessageType, ProfileProgress, ServiceType,
};
use crate::rng::RootRng;
use crate::service::{
    EventPublisher, Service, ServiceContext, ServiceResult, ServiceRuntimeError,
};
use crate::timing::cancellation::RequestCancellationStrategy;
use crate::timing::phase::{phase_plan, CreditPhaseStats, PhaseConfig};
use crate::timing::strategy::{build_strategy, PhaseDriver, TimingStrategy};

/// Everything assembled at configure time, consumed at start.
struct ConfiguredRun {
    strategy: Box<dyn TimingStrategy>,
    phases: Vec<PhaseConfig>,
    sampler: Box<dyn ConversationSampler>,
    cancellation: RequestCancellationStrategy,
}

pub struct TimingManager {
    service_id: ServiceId,
    user_config: Arc<UserConfig>,
    dataset: Arc<LoadedDataset>,
    root_rng: RootRng,
    configured: Option<ConfiguredRun>,
    return_tx: Option<mpsc::UnboundedSender<CreditReturn>>,
    cancel_tx: watch::Sender<bool>,
    started: bool,
}

impl TimingManager {
    pub fn new(user_config: Arc<UserConfig>, dataset: Arc<LoadedDataset>) -> Self {
        let root_rng = RootRng::new(user_config.loadgen.random_seed);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            service_id: ServiceId::generate("timing_manager"),
            user_config,
            dataset,
            root_rng,
            configured: None,
            return_tx: None,
            cancel_tx,
            started: false,
        }
    }

    /// Fetches the traced timing schedule from the dataset manager.
    async fn fetch_schedule(
        &self,
        ctx: &ServiceContext,
    ) -> Result<Vec<TimingScheduleEntry>, ServiceRuntimeError> {
        let request = BusMessage::new(self.service_id.clone(), Message::DatasetTimingRequest {})
            .with_target_type(ServiceType::DatasetManager);
        let response = ctx
            .bus
            .commands
            .request(request, ctx.config.command_timeout())
            .await?;
        if !response.is_success() {
            return Err(ServiceRuntimeError::Fatal(format!(
                "dataset timing request failed: {}",
                response.error.unwrap_or_default()
            )));
        }
        let payload = response.payload.unwrap_or(serde_json::Value::Null);
        let timing: DatasetTimingResponse = serde_json::from_value(payload)
            .map_err(|err| ServiceRuntimeError::Fatal(format!("bad timing response: {err}")))?;
        Ok(timing.schedule)
    }

    async fn configure(&mut self, ctx: &ServiceContext) -> Result<(), ServiceRuntimeError> {
        let loadgen = &self.user_config.loadgen;
        let schedule = if loadgen.timing_mode == TimingMode::FixedSchedule {
            self.fetch_schedule(ctx).await?
        } else {
            Vec::new()
        };

        let strategy = build_strategy(loadgen, &schedule, self.root_rng.child("arrival"))
            .map_err(|err| ServiceRuntimeError::Fatal(err.to_string()))?;
        let phases = phase_plan(loadgen, Some(schedule.len() as u64).filter(|n| *n > 0));
        let sampler = build_sampler(
            loadgen.sampler,
            self.dataset.ordered_ids().to_vec(),
            self.root_rng.child("sampler"),
        );
        let cancellation = RequestCancellationStrategy::new(
            loadgen.cancellation,
            self.root_rng.child("cancellation"),
        );

        info!(
            service_id = %self.service_id,
            mode = ?loadgen.timing_mode,
            phases = phases.len(),
            "timing manager configured"
        );
        self.configured = Some(ConfiguredRun {
            strategy,
            phases,
            sampler,
            cancellation,
        });
        Ok(())
    }

    fn start_run(&mut self, ctx: &mut ServiceContext) -> Result<(), ServiceRuntimeError> {
        let Some(configured) = self.configured.take() else {
            return Err(ServiceRuntimeError::Recoverable(
                "profile start before configure".to_string(),
            ));
        };
        let (return_tx, return_rx) = mpsc::unbounded_channel();
        self.return_tx = Some(return_tx);
        self.started = true;

        let publisher = ctx.publisher();
        let queue = ctx.bus.credit_queue.clone();
        let cancel_rx = self.cancel_tx.subscribe();
        let clock = ctx.clock;
        let progress_interval = ctx.config.progress_interval();

        ctx.spawn_task("credit-phases", async move {
            run_phases(
                configured,
                publisher,
                queue,
                return_rx,
                cancel_rx,
                clock,
                progress_interval,
            )
            .await;
        });
        Ok(())
    }
}

#[async_trait]
impl Service for TimingManager {
    fn service_id(&self) -> ServiceId {
        self.service_id.clone()
    }

    fn service_type(&self) -> ServiceType {
        ServiceType::TimingManager
    }

    fn subscriptions(&self) -> Vec<MessageType> {
        vec![MessageType::CreditReturn]
    }

    async fn handle_message(
        &mut self,
        message: BusMessage,
        _ctx: &mut ServiceContext,
    ) -> ServiceResult {
        if let Message::CreditReturn(credit) = message.payload {
            if let Some(tx) = &self.return_tx {
                let _ = tx.send(credit);
            }
        }
        Ok(())
    }

    async fn handle_command(
        &mut self,
        delivery: CommandDelivery,
        ctx: &mut ServiceContext,
    ) -> ServiceResult {
        let request_id = delivery.message.envelope.request_id;
        let Message::Command(Command { command_id, kind }) = &delivery.message.payload else {
            delivery.respond(CommandResponse::rejected(request_id, "expected a command"));
            return Ok(());
        };
        let command_id = *command_id;

        match kind {
            CommandKind::ProfileConfigure {} => match self.configure(ctx).await {
                Ok(()) => delivery.respond(CommandResponse::success(command_id, None)),
                Err(err) => {
                    error!(error = %err, "profile configure failed");
                    delivery.respond(CommandResponse::failure(command_id, err.to_string()));
                    return Err(err);
                }
            },
            CommandKind::ProfileStart {} => {
                if self.started {
                    delivery.respond(CommandResponse::rejected(command_id, "already started"));
                    return Ok(());
                }
                match self.start_run(ctx) {
                    Ok(()) => delivery.respond(CommandResponse::success(command_id, None)),
                    Err(err) => {
                        delivery.respond(CommandResponse::rejected(command_id, err.to_string()))
                    }
                }
            }
            CommandKind::ProfileStop { reason } => {
                warn!(reason = %reason, "profile stop requested");
                let _ = self.cancel_tx.send(true);
                delivery.respond(CommandResponse::success(command_id, None));
            }
            _ => {
                delivery.respond(CommandResponse::rejected(command_id, "unsupported command"));
            }
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &mut ServiceContext) -> ServiceResult {
        let _ = self.cancel_tx.send(true);
        Ok(())
    }
}

/// The phase execution loop, run as a background task of the manager.
async fn run_phases(
    mut configured: ConfiguredRun,
    publisher: EventPublisher,
    queue: WorkQueue,
    mut returns: mpsc::UnboundedReceiver<CreditReturn>,
    cancel_rx: watch::Receiver<bool>,
    clock: MonotonicClock,
    progress_interval: Duration,
) {
    let mut was_cancelled = false;
    let phases = std::mem::take(&mut configured.phases);

    for config in &phases {
        let start_ns = clock.perf_ns().max(1);
        let mut stats = CreditPhaseStats::new(config.phase, config.total_expected, start_ns);

        let _ = publisher.publish(Message::CreditPhaseStart(CreditPhaseStart {
            phase: config.phase,
            start_ns,
            total_expected_requests: config.total_expected,
            expected_duration_sec: config.duration.map(|d| d.as_secs_f64()),
        }));
        let _ = publisher.publish(Message::ProfileProgress(ProfileProgress {
            start_ns,
            end_ns: None,
            total: config.total_expected,
            completed: 0,
            warmup: config.phase == crate::messages::CreditPhase::Warmup,
        }));

        {
            let mut driver = PhaseDriver::new(
                &mut stats,
                config,
                &queue,
                &publisher,
                configured.sampler.as_mut(),
                &mut configured.cancellation,
                &mut returns,
                cancel_rx.clone(),
                clock,
                progress_interval,
            );
            if let Err(err) = configured.strategy.run_phase(&mut driver).await {
                error!(phase = %config.phase, error = %err, "timing strategy failed");
                let _ = publisher.publish(Message::ServiceError(crate::messages::ServiceError {
                    message: err.to_string(),
                    fatal: true,
                }));
                return;
            }
        }

        stats.sent_end_ns = Some(clock.perf_ns());
        let _ = publisher.publish(Message::CreditPhaseSendingComplete(
            CreditPhaseSendingComplete {
                phase: config.phase,
                sent_end_ns: stats.sent_end_ns,
            },
        ));

        drain_returns(&mut stats, &mut returns, cancel_rx.clone(), config).await;

        if *cancel_rx.borrow() {
            was_cancelled = true;
            stats.cancelled = true;
        }
        stats.end_ns = Some(clock.perf_ns());

        let _ = publisher.publish(Message::CreditPhaseProgress(CreditPhaseProgress {
            phase: config.phase,
            sent: stats.sent,
            completed: stats.completed,
        }));
        let _ = publisher.publish(Message::CreditPhaseComplete(CreditPhaseComplete {
            phase: config.phase,
            end_ns: stats.end_ns,
        }));
        info!(
            phase = %config.phase,
            sent = stats.sent,
            completed = stats.completed,
            errors = stats.errors,
            cancelled = stats.cancelled,
            "credit phase complete"
        );

        if was_cancelled {
            break;
        }
    }

    let _ = publisher.publish(Message::CreditsComplete { was_cancelled });
}

/// Waits for the outstanding credits after sending completes. Credits
/// still missing when the grace period expires are written off as
/// errors, so a crashed worker cannot wedge the phase.
async fn drain_returns(
    stats: &mut CreditPhaseStats,
    returns: &mut mpsc::UnboundedReceiver<CreditReturn>,
    mut cancel_rx: watch::Receiver<bool>,
    config: &PhaseConfig,
) {
    if stats.outstanding() == 0 {
        return;
    }
    let grace_deadline = tokio::time::Instant::now() + config.grace_period;
    while stats.outstanding() > 0 {
        tokio::select! {
            credit = returns.recv() => match credit {
                Some(credit) => {
                    if credit.phase == stats.phase {
                        stats.completed += 1;
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(grace_deadline) => {
                warn!(
                    phase = %config.phase,
                    lost = stats.outstanding(),
                    "grace period expired with outstanding credits"
                );
                stats.errors += stats.outstanding();
                break;
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
        }
    }
}
