//! Raw and parsed request records
//!
//! A `RequestRecord` is the raw observation of one HTTP exchange as
//! captured by a worker; a `ParsedResponseRecord` is the same exchange
//! after the endpoint parser has decoded text deltas and token counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain_types::{ConversationId, ModelName, ServiceId};
use crate::endpoints::EndpointType;
use crate::error::ErrorDetails;
use crate::messages::credit::CreditPhase;
use crate::transport::sse::SseMessage;

/// A whole-body (non-streaming) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResponse {
    pub perf_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub text: String,
}

/// One captured response: either a full body or a single SSE message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseData {
    Text(TextResponse),
    Sse(SseMessage),
}

impl ResponseData {
    pub fn perf_ns(&self) -> u64 {
        match self {
            Self::Text(t) => t.perf_ns,
            Self::Sse(s) => s.perf_ns,
        }
    }
}

/// The raw observation of a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub credit_phase: CreditPhase,
    pub worker_id: ServiceId,
    pub conversation_id: ConversationId,
    pub turn_index: usize,
    pub model_name: ModelName,
    pub endpoint_type: EndpointType,
    /// Input texts of the dispatched turn, kept so token-count metrics
    /// are computable even for error records.
    pub input_texts: Vec<String>,

    /// Monotonic clock at send.
    pub start_perf_ns: u64,
    /// Wall clock at send.
    pub timestamp_ns: u64,
    pub end_perf_ns: u64,
    /// Monotonic clock at first byte of the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_start_perf_ns: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_drop_ns: Option<u64>,
    /// How far behind the scheduled drop time the launch was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delayed_ns: Option<u64>,
    /// Latency from credit receipt to the HTTP send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_inference_ns: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub responses: Vec<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl RequestRecord {
    /// Whether the exchange completed without any error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Total request latency in nanoseconds.
    pub fn latency_ns(&self) -> u64 {
        self.end_perf_ns.saturating_sub(self.start_perf_ns)
    }

    /// Time to first byte in nanoseconds, when a first byte was seen.
    pub fn time_to_first_byte_ns(&self) -> Option<u64> {
        self.recv_start_perf_ns
            .map(|recv| recv.saturating_sub(self.start_perf_ns))
    }
}

/// One decoded response entry of a parsed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub perf_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Server-reported usage object, passed through unchanged. The
    /// parser never aggregates usage fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

/// A `RequestRecord` augmented with endpoint-specific derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponseRecord {
    pub request: RequestRecord,
    pub responses: Vec<ParsedResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_token_count: Option<u64>,
    /// False when a processing error occurred while parsing; the record
    /// is still emitted with the error attached.
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl ParsedResponseRecord {
    /// Concatenated output text across all responses.
    pub fn output_text(&self) -> String {
        self.responses
            .iter()
            .filter_map(|r| r.text.as_deref())
            .collect()
    }

    /// The last usage object the server reported, if any.
    pub fn final_usage(&self) -> Option<&serde_json::Value> {
        self.responses.iter().rev().find_map(|r| r.usage.as_ref())
    }
}

/// A GPU telemetry sample arriving on the raw-records channel. The core
/// passes these through to the telemetry export; it never produces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub dcgm_url: String,
    pub gpu_uuid: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp_ns: u64,
}
