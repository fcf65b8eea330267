//! Run progress and result messages

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain_types::ServiceId;
use crate::error::ErrorDetails;
use crate::records::metrics::MetricResult;

/// Progress of the profile run, for UI rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileProgress {
    pub start_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ns: Option<u64>,
    /// Total expected requests, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub completed: u64,
    #[serde(default)]
    pub warmup: bool,
}

/// Records-manager processing counters, published periodically so the
/// controller can render progress independent of metric computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub error_count: u64,
    pub completed: u64,
    /// Per-worker completion counts, keyed by worker service id.
    #[serde(default)]
    pub worker_completed: HashMap<ServiceId, u64>,
    /// Per-worker error counts, keyed by worker service id.
    #[serde(default)]
    pub worker_errors: HashMap<ServiceId, u64>,
}

/// One distinct error and how many records carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetailsCount {
    pub details: ErrorDetails,
    pub count: u64,
}

/// Final results of the profiling phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResults {
    pub records: Vec<MetricResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub completed: u64,
    pub start_ns: u64,
    pub end_ns: u64,
    #[serde(default)]
    pub was_cancelled: bool,
    #[serde(default)]
    pub errors_by_type: Vec<ErrorDetailsCount>,
}
