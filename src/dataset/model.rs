//! Conversation data model
//!
//! Conversations are the unit the dataset manager serves and the sampler
//! selects from. They are immutable once loaded; every service that holds
//! one holds a shared reference to the same loaded set.

use serde::{Deserialize, Serialize};

use crate::domain_types::{ConversationId, ModelName};

/// One turn of a conversation: the input texts for a single request plus
/// per-turn generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub texts: Vec<String>,
    /// Overrides the endpoint's configured model for this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Delay to wait after the previous turn completes, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl Turn {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
            model: None,
            max_tokens: None,
            delay_ms: None,
        }
    }
}

/// An ordered sequence of turns with a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(id: ConversationId, turns: Vec<Turn>) -> Self {
        Self { id, turns }
    }

    pub fn turn(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index)
    }
}

/// One entry of a traced dataset's timing schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingScheduleEntry {
    /// Scheduled launch offset in milliseconds, relative to the trace zero.
    pub timestamp_ms: i64,
    pub conversation_id: ConversationId,
}

/// Generates conversation ids for synthetic datasets.
///
/// With a seed, ids are sequential (`session_000000`, `session_000001`,
/// ...) so reruns address the same conversations; without one they are
/// random UUIDs.
#[derive(Debug)]
pub struct ConversationIdGenerator {
    deterministic: bool,
    prefix: String,
    counter: u64,
}

impl ConversationIdGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            deterministic: seed.is_some(),
            prefix: "session".to_string(),
            counter: 0,
        }
    }

    pub fn next_id(&mut self) -> ConversationId {
        let raw = if self.deterministic {
            let id = format!("{}_{:06}", self.prefix, self.counter);
            self.counter += 1;
            id
        } else {
            uuid::Uuid::new_v4().to_string()
        };
        ConversationId::try_new(raw).expect("generated ids are non-empty")
    }
}
