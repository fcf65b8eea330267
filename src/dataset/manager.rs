//! Dataset manager service
//!
//! Serves conversation and turn lookups over the command bus and
//! broadcasts `DatasetConfigured` once the set is visible to everyone.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bus::CommandDelivery;
use crate::dataset::{DatasetError, LoadedDataset};
use crate::domain_types::ServiceId;
use crate::messages::{
    BusMessage, CommandResponse, ConversationRequest, ConversationResponse,
    ConversationTurnRequest, ConversationTurnResponse, DatasetConfiguredNotification,
    DatasetTimingResponse, Message, ServiceType,
};
use crate::service::{Service, ServiceContext, ServiceResult};

pub struct DatasetManager {
    service_id: ServiceId,
    dataset: Arc<LoadedDataset>,
}

impl DatasetManager {
    pub fn new(dataset: Arc<LoadedDataset>) -> Self {
        Self {
            service_id: ServiceId::generate("dataset_manager"),
            dataset,
        }
    }

    fn lookup_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<ConversationResponse, DatasetError> {
        self.dataset
            .conversation(&request.conversation_id)
            .map(|conversation| ConversationResponse {
                conversation: conversation.clone(),
            })
    }

    fn lookup_turn(
        &self,
        request: &ConversationTurnRequest,
    ) -> Result<ConversationTurnResponse, DatasetError> {
        self.dataset
            .turn(&request.conversation_id, request.turn_index)
            .map(|turn| ConversationTurnResponse {
                conversation_id: request.conversation_id.clone(),
                turn_index: request.turn_index,
                turn: turn.clone(),
            })
    }
}

#[async_trait]
impl Service for DatasetManager {
    fn service_id(&self) -> ServiceId {
        self.service_id.clone()
    }

    fn service_type(&self) -> ServiceType {
        ServiceType::DatasetManager
    }

    async fn start(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        info!(
            service_id = %self.service_id,
            conversations = self.dataset.len(),
            has_schedule = self.dataset.has_timing_schedule(),
            "dataset configured"
        );
        ctx.publish(Message::DatasetConfiguredNotification(
            DatasetConfiguredNotification {
                conversation_count: self.dataset.len(),
                has_timing_schedule: self.dataset.has_timing_schedule(),
            },
        ))?;
        Ok(())
    }

    async fn handle_command(
        &mut self,
        delivery: CommandDelivery,
        _ctx: &mut ServiceContext,
    ) -> ServiceResult {
        let request_id = delivery.message.envelope.request_id;
        let response = match &delivery.message.payload {
            Message::ConversationRequest(request) => match self.lookup_conversation(request) {
                Ok(found) => success(request_id, &found),
                Err(err) => CommandResponse::failure(request_id, err.to_string()),
            },
            Message::ConversationTurnRequest(request) => match self.lookup_turn(request) {
                Ok(found) => success(request_id, &found),
                Err(err) => CommandResponse::failure(request_id, err.to_string()),
            },
            Message::DatasetTimingRequest {} => {
                let response = DatasetTimingResponse {
                    schedule: self.dataset.timing_schedule().to_vec(),
                };
                success(request_id, &response)
            }
            _ => {
                debug!(
                    message_type = %delivery.message.message_type(),
                    "unsupported dataset command"
                );
                CommandResponse::rejected(request_id, "unsupported dataset request")
            }
        };
        delivery.respond(response);
        Ok(())
    }
}

fn success<T: serde::Serialize>(request_id: uuid::Uuid, payload: &T) -> CommandResponse {
    match serde_json::to_value(payload) {
        Ok(value) => CommandResponse::success(request_id, Some(value)),
        Err(err) => CommandResponse::failure(request_id, format!("encode failed: {err}")),
    }
}
