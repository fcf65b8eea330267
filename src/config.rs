//! Typed configuration for a benchmark run
//!
//! The CLI and any file loaders are external collaborators; they hand
//! the core these structs. Validation happens once, up front, and any
//! conflict is a fatal configuration error with a field path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::dataset::model::{Conversation, TimingScheduleEntry};
use crate::domain_types::{
    BatchSize, CancellationRate, ConcurrencyLimit, ModelName, RequestRate,
};
use crate::endpoints::EndpointType;
use crate::error::AiperfError;

/// The algorithm that decides when credits are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    Concurrency,
    RequestRate,
    FixedSchedule,
}

/// Inter-arrival distribution for request-rate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalPattern {
    Poisson,
    Constant,
}

/// The algorithm that selects which conversation a credit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Sequential,
    Random,
    Shuffle,
}

/// Where the conversation set comes from. File parsing happens outside
/// the core; the core receives loaded data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSource {
    /// Generate `conversation_count` single-turn conversations from a
    /// fixed prompt text.
    Synthetic {
        conversation_count: usize,
        prompt_text: String,
    },
    /// Conversations loaded by an external loader.
    Provided { conversations: Vec<Conversation> },
    /// A traced dataset with per-request timestamps.
    Trace {
        conversations: Vec<Conversation>,
        schedule: Vec<TimingScheduleEntry>,
    },
}

/// Target endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub endpoint_type: EndpointType,
    pub model: ModelName,
    pub streaming: bool,
    /// Total per-request timeout.
    pub timeout_ms: u64,
    /// Extra request headers merged into every request.
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request-cancellation settings: with probability `rate` (percent), a
/// credit is marked for forced cancellation `delay_ms` after send.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancellationConfig {
    pub rate: CancellationRate,
    pub delay_ms: u64,
}

/// Load-generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadGenConfig {
    pub timing_mode: TimingMode,
    #[serde(default)]
    pub concurrency: ConcurrencyLimit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_rate: Option<RequestRate>,
    #[serde(default = "default_arrival")]
    pub arrival: ArrivalPattern,

    /// Warmup phase terminators. Zero/None disables warmup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_request_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_duration_ms: Option<u64>,

    /// Profiling phase terminators; exactly one must be set outside
    /// fixed-schedule mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Grace period after sending completes before a duration-bounded
    /// phase is forced complete.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Fixed-schedule zero-offset policy: `true` makes the first entry's
    /// timestamp the zero time.
    #[serde(default)]
    pub auto_offset_timestamps: bool,
    /// Manual zero-offset in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_schedule_start_offset_ms: Option<i64>,

    #[serde(default = "default_sampler")]
    pub sampler: SamplerKind,
    /// Root seed for all derived generators. `None` is nondeterministic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationConfig>,
}

fn default_arrival() -> ArrivalPattern {
    ArrivalPattern::Poisson
}

fn default_grace_period_ms() -> u64 {
    30_000
}

fn default_sampler() -> SamplerKind {
    SamplerKind::Sequential
}

/// Output artifact settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub artifact_dir: PathBuf,
    /// When set, metrics are additionally aggregated per time slice of
    /// this duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeslice_duration_ms: Option<u64>,
}

/// Everything the user chose for this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    pub endpoint: EndpointConfig,
    pub loadgen: LoadGenConfig,
    pub input: DatasetSource,
    pub output: OutputConfig,
}

impl UserConfig {
    /// Validates cross-field constraints. Field paths in errors follow
    /// the struct layout.
    pub fn validate(&self) -> Result<(), AiperfError> {
        if !self.endpoint.base_url.starts_with("http://")
            && !self.endpoint.base_url.starts_with("https://")
        {
            return Err(AiperfError::config(
                "endpoint.base_url",
                "must start with http:// or https://",
            ));
        }
        if self.endpoint.timeout_ms == 0 {
            return Err(AiperfError::config("endpoint.timeout_ms", "must be positive"));
        }
        if self.endpoint.streaming && !self.endpoint.endpoint_type.supports_streaming() {
            return Err(AiperfError::config(
                "endpoint.streaming",
                format!(
                    "endpoint type `{}` does not support streaming",
                    self.endpoint.endpoint_type
                ),
            ));
        }

        match self.loadgen.timing_mode {
            TimingMode::Concurrency | TimingMode::RequestRate => {
                if self.loadgen.timing_mode == TimingMode::RequestRate
                    && self.loadgen.request_rate.is_none()
                {
                    return Err(AiperfError::config(
                        "loadgen.request_rate",
                        "required in request-rate mode",
                    ));
                }
                if self.loadgen.request_count.is_none() && self.loadgen.duration_ms.is_none() {
                    return Err(AiperfError::config(
                        "loadgen.request_count",
                        "either request_count or duration_ms must be set",
                    ));
                }
            }
            TimingMode::FixedSchedule => {
                let schedule_len = match &self.input {
                    DatasetSource::Trace { schedule, .. } => schedule.len(),
                    _ => {
                        return Err(AiperfError::config(
                            "input",
                            "fixed-schedule mode requires a traced dataset",
                        ))
                    }
                };
                if schedule_len == 0 {
                    return Err(AiperfError::config(
                        "input.schedule",
                        "fixed-schedule mode requires a non-empty schedule",
                    ));
                }
                if self.loadgen.auto_offset_timestamps
                    && self.loadgen.fixed_schedule_start_offset_ms.is_some()
                {
                    return Err(AiperfError::config(
                        "loadgen.fixed_schedule_start_offset_ms",
                        "conflicts with auto_offset_timestamps",
                    ));
                }
                if self.loadgen.warmup_request_count.is_some()
                    || self.loadgen.warmup_duration_ms.is_some()
                {
                    return Err(AiperfError::config(
                        "loadgen.warmup_request_count",
                        "warmup is not supported in fixed-schedule mode",
                    ));
                }
            }
        }

        if let DatasetSource::Synthetic {
            conversation_count, ..
        } = &self.input
        {
            if *conversation_count == 0 {
                return Err(AiperfError::config(
                    "input.conversation_count",
                    "must be at least 1",
                ));
            }
        }

        if self.output.artifact_dir.as_os_str().is_empty() {
            return Err(AiperfError::config("output.artifact_dir", "must be set"));
        }

        Ok(())
    }

    /// The effective configuration as a JSON value, echoed into exports
    /// and printed by `aiperf config`.
    pub fn effective_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Worker pool sizing bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// User-configured lower bound.
    pub min: usize,
    /// User override for the CPU-derived upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

/// Worker status derivation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealthConfig {
    pub health_interval_ms: u64,
    /// A worker whose last heartbeat is older than this is STALE.
    pub staleness_window_ms: u64,
    /// CPU percentage at or above which a worker is HIGH_LOAD.
    pub high_load_cpu_percent: f64,
    /// Minimum time a worker stays HIGH_LOAD after entering it.
    pub high_load_recovery_ms: u64,
    /// Failures within this window mark the worker ERROR.
    pub error_window_ms: u64,
}

/// Operational settings for the service mesh itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub heartbeat_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub workers: WorkerPoolConfig,
    pub worker_health: WorkerHealthConfig,
    pub record_batch_size: BatchSize,
}

impl ServiceConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1_000,
            progress_interval_ms: 500,
            command_timeout_ms: 10_000,
            shutdown_timeout_ms: 30_000,
            workers: WorkerPoolConfig { min: 1, max: None },
            worker_health: WorkerHealthConfig {
                health_interval_ms: 1_000,
                staleness_window_ms: 10_000,
                high_load_cpu_percent: 85.0,
                high_load_recovery_ms: 5_000,
                error_window_ms: 5_000,
            },
            record_batch_size: BatchSize::default(),
        }
    }
}

impl ServiceConfig {
    /// Fast intervals for tests.
    pub fn development() -> Self {
        Self {
            heartbeat_interval_ms: 50,
            progress_interval_ms: 20,
            command_timeout_ms: 2_000,
            shutdown_timeout_ms: 2_000,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::ConversationId;

    fn base_config() -> UserConfig {
        UserConfig {
            endpoint: EndpointConfig {
                base_url: "http://localhost:8000".to_string(),
                endpoint_type: EndpointType::Chat,
                model: ModelName::try_new("test-model".to_string()).unwrap(),
                streaming: false,
                timeout_ms: 30_000,
                request_headers: BTreeMap::new(),
            },
            loadgen: LoadGenConfig {
                timing_mode: TimingMode::Concurrency,
                concurrency: ConcurrencyLimit::try_new(1).unwrap(),
                request_rate: None,
                arrival: ArrivalPattern::Poisson,
                warmup_request_count: None,
                warmup_duration_ms: None,
                request_count: Some(10),
                duration_ms: None,
                grace_period_ms: 1_000,
                auto_offset_timestamps: false,
                fixed_schedule_start_offset_ms: None,
                sampler: SamplerKind::Sequential,
                random_seed: Some(42),
                cancellation: None,
            },
            input: DatasetSource::Synthetic {
                conversation_count: 4,
                prompt_text: "hello".to_string(),
            },
            output: OutputConfig {
                artifact_dir: PathBuf::from("/tmp/aiperf"),
                timeslice_duration_ms: None,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rate_mode_requires_rate() {
        let mut config = base_config();
        config.loadgen.timing_mode = TimingMode::RequestRate;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("loadgen.request_rate"));
    }

    #[test]
    fn fixed_schedule_requires_trace() {
        let mut config = base_config();
        config.loadgen.timing_mode = TimingMode::FixedSchedule;
        assert!(config.validate().is_err());

        config.input = DatasetSource::Trace {
            conversations: vec![Conversation::new(
                ConversationId::try_new("c1".to_string()).unwrap(),
                vec![crate::dataset::model::Turn::from_text("hi")],
            )],
            schedule: vec![],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("non-empty schedule"));
    }

    #[test]
    fn streaming_embeddings_is_rejected() {
        let mut config = base_config();
        config.endpoint.endpoint_type = EndpointType::Embeddings;
        config.endpoint.streaming = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn a_terminator_is_required() {
        let mut config = base_config();
        config.loadgen.request_count = None;
        config.loadgen.duration_ms = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_json_echoes_fields() {
        let json = base_config().effective_json();
        assert_eq!(json["endpoint"]["base_url"], "http://localhost:8000");
        assert_eq!(json["loadgen"]["timing_mode"], "concurrency");
    }
}
