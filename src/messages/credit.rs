//! Credit lifecycle messages
//!
//! Credits are the permission tokens for request launches. The timing
//! manager drops them, exactly one worker consumes each, and the worker
//! returns it once, success or failure.

use serde::{Deserialize, Serialize};

use crate::domain_types::ConversationId;

/// The two sequential phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPhase {
    Warmup,
    Profiling,
}

impl CreditPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Profiling => "profiling",
        }
    }
}

impl std::fmt::Display for CreditPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credit has been dropped to the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditDrop {
    pub phase: CreditPhase,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub turn_index: usize,
    /// Target monotonic launch time. `None` means send as soon as
    /// possible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_drop_ns: Option<u64>,
    /// When set, the worker abandons the in-flight response this many
    /// nanoseconds after the send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_after_ns: Option<u64>,
}

/// A worker has fully consumed a credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditReturn {
    pub phase: CreditPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_drop_ns: Option<u64>,
    /// Nanoseconds the launch lagged its scheduled drop time. Only set
    /// when `credit_drop_ns` was set and the launch was late.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delayed_ns: Option<u64>,
    /// Latency from credit receipt to the HTTP send, for tracing
    /// dispatch bottlenecks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_inference_ns: Option<u64>,
}

impl CreditReturn {
    /// Whether the launch missed its scheduled time.
    pub fn delayed(&self) -> bool {
        self.delayed_ns.is_some()
    }
}

/// A credit phase has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseStart {
    pub phase: CreditPhase,
    pub start_ns: u64,
    /// Set only for request-count-terminated phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_expected_requests: Option<u64>,
    /// Set only for duration-terminated phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_sec: Option<f64>,
}

/// Periodic progress of a credit phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseProgress {
    pub phase: CreditPhase,
    pub sent: u64,
    pub completed: u64,
}

/// All credits for the phase have been issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseSendingComplete {
    pub phase: CreditPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_end_ns: Option<u64>,
}

/// The last credit of the phase has returned (or the grace period
/// elapsed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPhaseComplete {
    pub phase: CreditPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ns: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asap_drop_omits_schedule_fields() {
        let drop = CreditDrop {
            phase: CreditPhase::Warmup,
            conversation_id: ConversationId::try_new("c1".to_string()).unwrap(),
            turn_index: 0,
            credit_drop_ns: None,
            cancel_after_ns: None,
        };
        let json = serde_json::to_value(&drop).unwrap();
        assert!(json.get("credit_drop_ns").is_none());
        assert!(json.get("cancel_after_ns").is_none());
    }

    #[test]
    fn delayed_flag_follows_delayed_ns() {
        let on_time = CreditReturn {
            phase: CreditPhase::Profiling,
            conversation_id: None,
            credit_drop_ns: Some(100),
            delayed_ns: None,
            pre_inference_ns: Some(5),
        };
        assert!(!on_time.delayed());

        let late = CreditReturn {
            delayed_ns: Some(42),
            ..on_time
        };
        assert!(late.delayed());
    }
}
