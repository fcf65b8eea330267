//! Worker status derivation
//!
//! The worker manager folds health heartbeats into per-worker
//! observations and derives a status: ERROR dominates HIGH_LOAD, a
//! worker stays HIGH_LOAD for at least the recovery window after load
//! drops, IDLE means no tasks were ever assigned, and STALE marks a
//! heartbeat older than the staleness window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::WorkerHealthConfig;
use crate::domain_types::ServiceId;
use crate::messages::{WorkerHealth, WorkerStatus};

/// Rolling observation of one worker.
#[derive(Debug, Clone)]
pub struct WorkerObservation {
    pub last_heartbeat: Instant,
    pub health: WorkerHealth,
    /// When the failure counter last increased.
    pub last_failure_at: Option<Instant>,
    /// When CPU was last at or above the high-load threshold.
    pub high_load_at: Option<Instant>,
    failed_seen: u64,
}

/// Tracks every known worker's health history.
#[derive(Debug, Default)]
pub struct WorkerTracker {
    workers: HashMap<ServiceId, WorkerObservation>,
}

impl WorkerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Folds one heartbeat in at time `now`.
    pub fn update(
        &mut self,
        worker_id: ServiceId,
        health: WorkerHealth,
        config: &WorkerHealthConfig,
        now: Instant,
    ) {
        let failed = health.failed_tasks();
        let high_load = health.health.cpu_percent >= config.high_load_cpu_percent;
        let entry = self
            .workers
            .entry(worker_id)
            .or_insert_with(|| WorkerObservation {
                last_heartbeat: now,
                health: health.clone(),
                last_failure_at: None,
                high_load_at: None,
                failed_seen: 0,
            });

        if failed > entry.failed_seen {
            entry.last_failure_at = Some(now);
        }
        if high_load {
            entry.high_load_at = Some(now);
        }
        entry.failed_seen = failed;
        entry.health = health;
        entry.last_heartbeat = now;
    }

    /// Derives the status of every known worker at time `now`.
    pub fn statuses(&self, config: &WorkerHealthConfig, now: Instant) -> HashMap<ServiceId, WorkerStatus> {
        self.workers
            .iter()
            .map(|(id, obs)| (id.clone(), derive_status(obs, config, now)))
            .collect()
    }
}

pub fn derive_status(
    observation: &WorkerObservation,
    config: &WorkerHealthConfig,
    now: Instant,
) -> WorkerStatus {
    let staleness = Duration::from_millis(config.staleness_window_ms);
    if now.duration_since(observation.last_heartbeat) > staleness {
        return WorkerStatus::Stale;
    }

    let error_window = Duration::from_millis(config.error_window_ms);
    if observation
        .last_failure_at
        .is_some_and(|at| now.duration_since(at) <= error_window)
    {
        return WorkerStatus::Error;
    }

    let recovery = Duration::from_millis(config.high_load_recovery_ms);
    if observation
        .high_load_at
        .is_some_and(|at| now.duration_since(at) <= recovery)
    {
        return WorkerStatus::HighLoad;
    }

    if observation.health.total_tasks() == 0 {
        return WorkerStatus::Idle;
    }

    WorkerStatus::Healthy
}
