//! Worker manager service
//!
//! Sizes the worker pool from the machine and the configured load,
//! asks the controller to spawn that many workers, and folds worker
//! heartbeats into a status summary.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{TimingMode, UserConfig, WorkerPoolConfig};
use crate::domain_types::ServiceId;
use crate::messages::{
    BusMessage, Command, CommandKind, Message, MessageType, ServiceType, WorkerStatusSummary,
};
use crate::service::{Service, ServiceContext, ServiceResult, ServiceRuntimeError};
use crate::workers::status::WorkerTracker;

/// Workers never exceed this, regardless of core count.
const HARD_WORKER_CAP: usize = 32;

/// Pool sizing: `max(1, ceil(cpus * 0.75) - 1)`, hard-capped, then
/// bounded by concurrency (a pool larger than C+1 cannot be kept busy in
/// concurrency mode) and raised to the configured minimum.
pub fn compute_max_workers(
    cpu_count: usize,
    pool: &WorkerPoolConfig,
    timing_mode: TimingMode,
    concurrency: usize,
) -> usize {
    let base = ((cpu_count as f64 * 0.75).ceil() as usize).saturating_sub(1);
    let mut workers = base.max(1).min(HARD_WORKER_CAP);
    if let Some(user_max) = pool.max {
        workers = workers.min(user_max.max(1));
    }
    if timing_mode == TimingMode::Concurrency && concurrency >= 1 {
        workers = workers.min(concurrency + 1);
    }
    workers.max(pool.min.max(1))
}

pub struct WorkerManager {
    service_id: ServiceId,
    user_config: Arc<UserConfig>,
    tracker: Arc<Mutex<WorkerTracker>>,
    requested_workers: usize,
}

impl WorkerManager {
    pub fn new(user_config: Arc<UserConfig>) -> Self {
        Self {
            service_id: ServiceId::generate("worker_manager"),
            user_config,
            tracker: Arc::new(Mutex::new(WorkerTracker::new())),
            requested_workers: 0,
        }
    }

    pub fn requested_workers(&self) -> usize {
        self.requested_workers
    }
}

#[async_trait]
impl Service for WorkerManager {
    fn service_id(&self) -> ServiceId {
        self.service_id.clone()
    }

    fn service_type(&self) -> ServiceType {
        ServiceType::WorkerManager
    }

    fn subscriptions(&self) -> Vec<MessageType> {
        vec![MessageType::WorkerHealth]
    }

    async fn start(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        let num_workers = compute_max_workers(
            num_cpus::get(),
            &ctx.config.workers,
            self.user_config.loadgen.timing_mode,
            self.user_config.loadgen.concurrency.as_usize(),
        );
        self.requested_workers = num_workers;
        info!(num_workers, "requesting worker pool");

        let request = BusMessage::new(
            self.service_id.clone(),
            Message::Command(Command::new(CommandKind::SpawnWorkers { num_workers })),
        )
        .with_target_type(ServiceType::SystemController);
        let response = ctx
            .bus
            .commands
            .request(request, ctx.config.command_timeout())
            .await?;
        if !response.is_success() {
            return Err(ServiceRuntimeError::Fatal(format!(
                "controller refused worker spawn: {}",
                response.error.unwrap_or_default()
            )));
        }

        // Periodic status summary for the controller's view.
        let tracker = Arc::clone(&self.tracker);
        let publisher = ctx.publisher();
        let health_config = ctx.config.worker_health;
        let interval = Duration::from_millis(health_config.health_interval_ms);
        let mut shutdown = ctx.shutdown_signal();
        ctx.spawn_task("worker-status-summary", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let statuses = tracker
                            .lock()
                            .map(|tracker| tracker.statuses(&health_config, Instant::now()))
                            .unwrap_or_default();
                        if statuses.is_empty() {
                            continue;
                        }
                        let _ = publisher.publish(Message::WorkerStatusSummary(
                            WorkerStatusSummary {
                                worker_statuses: statuses,
                            },
                        ));
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: BusMessage,
        ctx: &mut ServiceContext,
    ) -> ServiceResult {
        if let Message::WorkerHealth(health) = message.payload {
            if let Ok(mut tracker) = self.tracker.lock() {
                tracker.update(
                    message.envelope.service_id,
                    health,
                    &ctx.config.worker_health,
                    Instant::now(),
                );
            }
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        // Ask the controller to wind the pool down; during a
        // controller-driven shutdown this is a no-op there.
        let request = BusMessage::new(
            self.service_id.clone(),
            Message::Command(Command::new(CommandKind::ShutdownWorkers {
                all_workers: true,
            })),
        )
        .with_target_type(ServiceType::SystemController);
        if let Err(err) = ctx
            .bus
            .commands
            .request(request, Duration::from_millis(500))
            .await
        {
            warn!(error = %err, "shutdown-workers request failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(min: usize, max: Option<usize>) -> WorkerPoolConfig {
        WorkerPoolConfig { min, max }
    }

    #[test]
    fn base_formula_from_cpu_count() {
        // ceil(8 * 0.75) - 1 = 5
        assert_eq!(
            compute_max_workers(8, &pool(1, None), TimingMode::RequestRate, 1),
            5
        );
        // ceil(2 * 0.75) - 1 = 1
        assert_eq!(
            compute_max_workers(2, &pool(1, None), TimingMode::RequestRate, 1),
            1
        );
        // Tiny machines still get one worker.
        assert_eq!(
            compute_max_workers(1, &pool(1, None), TimingMode::RequestRate, 1),
            1
        );
    }

    #[test]
    fn hard_cap_applies() {
        assert_eq!(
            compute_max_workers(128, &pool(1, None), TimingMode::RequestRate, 1),
            HARD_WORKER_CAP
        );
    }

    #[test]
    fn concurrency_mode_caps_at_c_plus_one() {
        assert_eq!(
            compute_max_workers(32, &pool(1, None), TimingMode::Concurrency, 2),
            3
        );
        // Request-rate mode ignores concurrency.
        assert_eq!(
            compute_max_workers(32, &pool(1, None), TimingMode::RequestRate, 2),
            23
        );
    }

    #[test]
    fn user_minimum_wins_over_caps() {
        assert_eq!(
            compute_max_workers(2, &pool(4, None), TimingMode::Concurrency, 1),
            4
        );
    }

    #[test]
    fn user_maximum_bounds_the_pool() {
        assert_eq!(
            compute_max_workers(32, &pool(1, Some(3)), TimingMode::RequestRate, 1),
            3
        );
    }
}
