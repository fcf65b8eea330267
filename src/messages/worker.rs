//! Worker health and status messages

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain_types::ServiceId;
use crate::messages::credit::CreditPhase;

/// Process-level health of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHealth {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub uptime_sec: f64,
}

/// Per-phase task counters for one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPhaseTaskStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
}

/// Periodic worker heartbeat with health and task counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub health: ProcessHealth,
    /// Task counters keyed by credit phase.
    pub task_stats: HashMap<CreditPhase, WorkerPhaseTaskStats>,
}

impl WorkerHealth {
    pub fn total_tasks(&self) -> u64 {
        self.task_stats.values().map(|s| s.total).sum()
    }

    pub fn completed_tasks(&self) -> u64 {
        self.task_stats.values().map(|s| s.completed).sum()
    }

    pub fn failed_tasks(&self) -> u64 {
        self.task_stats.values().map(|s| s.failed).sum()
    }

    pub fn in_progress_tasks(&self) -> u64 {
        self.task_stats.values().map(|s| s.in_progress).sum()
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.total_tasks();
        if total == 0 {
            0.0
        } else {
            self.failed_tasks() as f64 / total as f64
        }
    }
}

/// Derived status of a worker, computed by the worker manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Healthy,
    HighLoad,
    Error,
    Idle,
    Stale,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::HighLoad => "high_load",
            Self::Error => "error",
            Self::Idle => "idle",
            Self::Stale => "stale",
        };
        f.write_str(s)
    }
}

/// Status of every known worker, broadcast by the worker manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatusSummary {
    pub worker_statuses: HashMap<ServiceId, WorkerStatus>,
}
