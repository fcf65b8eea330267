//! Dataset lookup messages

use serde::{Deserialize, Serialize};

use crate::dataset::model::{Conversation, TimingScheduleEntry, Turn};
use crate::domain_types::ConversationId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurnRequest {
    pub conversation_id: ConversationId,
    pub turn_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurnResponse {
    pub conversation_id: ConversationId,
    pub turn_index: usize,
    pub turn: Turn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetTimingRequest {}

/// The traced dataset's timing schedule, ordered by timestamp. Empty
/// when the loaded dataset carries no per-request timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetTimingResponse {
    pub schedule: Vec<TimingScheduleEntry>,
}

/// Broadcast once the conversation set is fully loaded; after this fires
/// all callers see a consistent view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfiguredNotification {
    pub conversation_count: usize,
    pub has_timing_schedule: bool,
}
