//! Typed bus messages
//!
//! Every message on the bus carries the envelope fields (`request_id`,
//! `request_ns`, `service_id`, optional targeting hints) plus a payload
//! discriminated by `message_type`. Serialization is self-describing
//! JSON so any schema-preserving encoding can reconstruct every field.

pub mod credit;
pub mod dataset;
pub mod inference;
pub mod progress;
pub mod service;
pub mod worker;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::wall_clock_ns;
use crate::domain_types::ServiceId;

pub use credit::{
    CreditDrop, CreditPhase, CreditPhaseComplete, CreditPhaseProgress, CreditPhaseSendingComplete,
    CreditPhaseStart, CreditReturn,
};
pub use dataset::{
    ConversationRequest, ConversationResponse, ConversationTurnRequest, ConversationTurnResponse,
    DatasetConfiguredNotification, DatasetTimingRequest, DatasetTimingResponse,
};
pub use inference::{GpuTelemetryRecords, InferenceResults, ParsedInferenceResults};
pub use progress::{ErrorDetailsCount, ProcessingStats, ProfileProgress, ProfileResults};
pub use service::{
    Command, CommandKind, CommandResponse, CommandResponseStatus, Heartbeat, Notification,
    Registration, ServiceError, ServiceState, ServiceType, Status,
};
pub use worker::{ProcessHealth, WorkerHealth, WorkerPhaseTaskStats, WorkerStatus, WorkerStatusSummary};

/// Discriminator for every message on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CreditDrop,
    CreditReturn,
    CreditPhaseStart,
    CreditPhaseProgress,
    CreditPhaseSendingComplete,
    CreditPhaseComplete,
    CreditsComplete,
    ConversationRequest,
    ConversationResponse,
    ConversationTurnRequest,
    ConversationTurnResponse,
    DatasetTimingRequest,
    DatasetTimingResponse,
    DatasetConfiguredNotification,
    InferenceResults,
    ParsedInferenceResults,
    GpuTelemetryRecords,
    WorkerHealth,
    WorkerStatusSummary,
    Registration,
    Heartbeat,
    Status,
    Notification,
    Command,
    CommandResponse,
    ServiceError,
    ProfileProgress,
    ProcessingStats,
    ProfileResults,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditDrop => "credit_drop",
            Self::CreditReturn => "credit_return",
            Self::CreditPhaseStart => "credit_phase_start",
            Self::CreditPhaseProgress => "credit_phase_progress",
            Self::CreditPhaseSendingComplete => "credit_phase_sending_complete",
            Self::CreditPhaseComplete => "credit_phase_complete",
            Self::CreditsComplete => "credits_complete",
            Self::ConversationRequest => "conversation_request",
            Self::ConversationResponse => "conversation_response",
            Self::ConversationTurnRequest => "conversation_turn_request",
            Self::ConversationTurnResponse => "conversation_turn_response",
            Self::DatasetTimingRequest => "dataset_timing_request",
            Self::DatasetTimingResponse => "dataset_timing_response",
            Self::DatasetConfiguredNotification => "dataset_configured_notification",
            Self::InferenceResults => "inference_results",
            Self::ParsedInferenceResults => "parsed_inference_results",
            Self::GpuTelemetryRecords => "gpu_telemetry_records",
            Self::WorkerHealth => "worker_health",
            Self::WorkerStatusSummary => "worker_status_summary",
            Self::Registration => "registration",
            Self::Heartbeat => "heartbeat",
            Self::Status => "status",
            Self::Notification => "notification",
            Self::Command => "command",
            Self::CommandResponse => "command_response",
            Self::ServiceError => "service_error",
            Self::ProfileProgress => "profile_progress",
            Self::ProcessingStats => "processing_stats",
            Self::ProfileResults => "profile_results",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of a bus message, discriminated by `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum Message {
    CreditDrop(CreditDrop),
    CreditReturn(CreditReturn),
    CreditPhaseStart(CreditPhaseStart),
    CreditPhaseProgress(CreditPhaseProgress),
    CreditPhaseSendingComplete(CreditPhaseSendingComplete),
    CreditPhaseComplete(CreditPhaseComplete),
    CreditsComplete {
        #[serde(default)]
        was_cancelled: bool,
    },
    ConversationRequest(ConversationRequest),
    ConversationResponse(ConversationResponse),
    ConversationTurnRequest(ConversationTurnRequest),
    ConversationTurnResponse(ConversationTurnResponse),
    DatasetTimingRequest {},
    DatasetTimingResponse(DatasetTimingResponse),
    DatasetConfiguredNotification(DatasetConfiguredNotification),
    InferenceResults(InferenceResults),
    ParsedInferenceResults(ParsedInferenceResults),
    GpuTelemetryRecords(GpuTelemetryRecords),
    WorkerHealth(WorkerHealth),
    WorkerStatusSummary(WorkerStatusSummary),
    Registration(Registration),
    Heartbeat(Heartbeat),
    Status(Status),
    Notification(Notification),
    Command(Command),
    CommandResponse(CommandResponse),
    ServiceError(ServiceError),
    ProfileProgress(ProfileProgress),
    ProcessingStats(ProcessingStats),
    ProfileResults(ProfileResults),
}

impl Message {
    /// The discriminator of this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CreditDrop(_) => MessageType::CreditDrop,
            Self::CreditReturn(_) => MessageType::CreditReturn,
            Self::CreditPhaseStart(_) => MessageType::CreditPhaseStart,
            Self::CreditPhaseProgress(_) => MessageType::CreditPhaseProgress,
            Self::CreditPhaseSendingComplete(_) => MessageType::CreditPhaseSendingComplete,
            Self::CreditPhaseComplete(_) => MessageType::CreditPhaseComplete,
            Self::CreditsComplete { .. } => MessageType::CreditsComplete,
            Self::ConversationRequest(_) => MessageType::ConversationRequest,
            Self::ConversationResponse(_) => MessageType::ConversationResponse,
            Self::ConversationTurnRequest(_) => MessageType::ConversationTurnRequest,
            Self::ConversationTurnResponse(_) => MessageType::ConversationTurnResponse,
            Self::DatasetTimingRequest {} => MessageType::DatasetTimingRequest,
            Self::DatasetTimingResponse(_) => MessageType::DatasetTimingResponse,
            Self::DatasetConfiguredNotification(_) => MessageType::DatasetConfiguredNotification,
            Self::InferenceResults(_) => MessageType::InferenceResults,
            Self::ParsedInferenceResults(_) => MessageType::ParsedInferenceResults,
            Self::GpuTelemetryRecords(_) => MessageType::GpuTelemetryRecords,
            Self::WorkerHealth(_) => MessageType::WorkerHealth,
            Self::WorkerStatusSummary(_) => MessageType::WorkerStatusSummary,
            Self::Registration(_) => MessageType::Registration,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::Status(_) => MessageType::Status,
            Self::Notification(_) => MessageType::Notification,
            Self::Command(_) => MessageType::Command,
            Self::CommandResponse(_) => MessageType::CommandResponse,
            Self::ServiceError(_) => MessageType::ServiceError,
            Self::ProfileProgress(_) => MessageType::ProfileProgress,
            Self::ProcessingStats(_) => MessageType::ProcessingStats,
            Self::ProfileResults(_) => MessageType::ProfileResults,
        }
    }
}

/// Envelope fields common to every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: Uuid,
    /// Wall-clock send time in nanoseconds.
    pub request_ns: u64,
    /// The originating service.
    pub service_id: ServiceId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_service_id: Option<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_service_type: Option<ServiceType>,
}

/// A complete message as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub payload: Message,
}

impl BusMessage {
    pub fn new(service_id: ServiceId, payload: Message) -> Self {
        Self {
            envelope: Envelope {
                request_id: Uuid::new_v4(),
                request_ns: wall_clock_ns(),
                service_id,
                target_service_id: None,
                target_service_type: None,
            },
            payload,
        }
    }

    /// Targets the message at one specific service instance.
    pub fn with_target_id(mut self, target: ServiceId) -> Self {
        self.envelope.target_service_id = Some(target);
        self
    }

    /// Targets the message at every service of one type.
    pub fn with_target_type(mut self, target: ServiceType) -> Self {
        self.envelope.target_service_type = Some(target);
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// The encoded topic this message is published under.
    pub fn topic(&self) -> String {
        let target = self
            .envelope
            .target_service_id
            .as_ref()
            .map(|id| id.to_string())
            .or_else(|| {
                self.envelope
                    .target_service_type
                    .map(|t| t.as_str().to_string())
            });
        crate::bus::topic::encode(self.message_type(), target.as_deref())
    }
}
