//! Conversation source of record
//!
//! The dataset manager owns the loaded conversation set and answers
//! lookups over the command bus. The set is built once, before any
//! service starts, and shared by reference; it is never mutated.

pub mod manager;
pub mod model;
pub mod samplers;

use std::collections::HashMap;
use thiserror::Error;

use crate::config::DatasetSource;
use crate::domain_types::ConversationId;

use model::{Conversation, ConversationIdGenerator, TimingScheduleEntry, Turn};

/// Dataset construction and lookup failures.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("turn index {index} out of range for conversation {conversation_id} ({len} turns)")]
    TurnOutOfRange {
        conversation_id: ConversationId,
        index: usize,
        len: usize,
    },

    #[error("dataset is empty")]
    Empty,

    #[error("conversation {0} has no turns")]
    NoTurns(ConversationId),
}

/// The immutable, fully loaded conversation set.
#[derive(Debug)]
pub struct LoadedDataset {
    conversations: HashMap<ConversationId, Conversation>,
    /// Ids in load order, for samplers and deterministic iteration.
    ordered_ids: Vec<ConversationId>,
    /// Per-request launch timestamps, present only for traced datasets.
    schedule: Vec<TimingScheduleEntry>,
}

impl LoadedDataset {
    pub fn conversation(&self, id: &ConversationId) -> Result<&Conversation, DatasetError> {
        self.conversations
            .get(id)
            .ok_or_else(|| DatasetError::NotFound(id.clone()))
    }

    pub fn turn(&self, id: &ConversationId, index: usize) -> Result<&Turn, DatasetError> {
        let conversation = self.conversation(id)?;
        conversation
            .turn(index)
            .ok_or_else(|| DatasetError::TurnOutOfRange {
                conversation_id: id.clone(),
                index,
                len: conversation.turns.len(),
            })
    }

    pub fn ordered_ids(&self) -> &[ConversationId] {
        &self.ordered_ids
    }

    pub fn timing_schedule(&self) -> &[TimingScheduleEntry] {
        &self.schedule
    }

    pub fn has_timing_schedule(&self) -> bool {
        !self.schedule.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

/// Builds the conversation set from the configured source. Runs before
/// services start; failures here are fatal configuration errors.
pub fn load_dataset(source: &DatasetSource, seed: Option<u64>) -> Result<LoadedDataset, DatasetError> {
    let (conversations, schedule) = match source {
        DatasetSource::Synthetic {
            conversation_count,
            prompt_text,
        } => {
            let mut generator = ConversationIdGenerator::new(seed);
            let conversations = (0..*conversation_count)
                .map(|_| {
                    Conversation::new(generator.next_id(), vec![Turn::from_text(prompt_text.clone())])
                })
                .collect();
            (conversations, Vec::new())
        }
        DatasetSource::Provided { conversations } => (conversations.clone(), Vec::new()),
        DatasetSource::Trace {
            conversations,
            schedule,
        } => {
            let mut schedule = schedule.clone();
            schedule.sort_by_key(|entry| entry.timestamp_ms);
            (conversations.clone(), schedule)
        }
    };

    if conversations.is_empty() {
        return Err(DatasetError::Empty);
    }

    let mut map = HashMap::with_capacity(conversations.len());
    let mut ordered_ids = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        if conversation.turns.is_empty() {
            return Err(DatasetError::NoTurns(conversation.id.clone()));
        }
        ordered_ids.push(conversation.id.clone());
        map.insert(conversation.id.clone(), conversation);
    }

    Ok(LoadedDataset {
        conversations: map,
        ordered_ids,
        schedule,
    })
}
