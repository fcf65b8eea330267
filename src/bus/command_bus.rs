//! Targeted request/reply channel
//!
//! The router end accepts envelopes addressed to a service id or a
//! service type and hands them to exactly one registered handler, which
//! replies through a one-shot channel. Replies carry a
//! `CommandResponse` with `SUCCESS`, `FAILURE`, or `REJECTED`.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::bus::BusError;
use crate::domain_types::ServiceId;
use crate::messages::{BusMessage, CommandResponse, ServiceType};

/// A command handed to a handler, with its reply slot.
#[derive(Debug)]
pub struct CommandDelivery {
    pub message: BusMessage,
    reply_tx: oneshot::Sender<CommandResponse>,
}

impl CommandDelivery {
    /// Sends the reply. A dropped requester is not an error; the reply
    /// is simply discarded.
    pub fn respond(self, response: CommandResponse) {
        let _ = self.reply_tx.send(response);
    }
}

#[derive(Default)]
struct CommandBusInner {
    by_id: DashMap<ServiceId, mpsc::UnboundedSender<CommandDelivery>>,
    by_type: DashMap<ServiceType, Vec<ServiceId>>,
}

/// Handle to the request/reply channel. Cheap to clone.
#[derive(Clone, Default)]
pub struct CommandBus {
    inner: Arc<CommandBusInner>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a service. The returned receiver yields
    /// every command addressed to that id or its type.
    pub fn register(
        &self,
        service_id: ServiceId,
        service_type: ServiceType,
    ) -> mpsc::UnboundedReceiver<CommandDelivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.by_id.insert(service_id.clone(), tx);
        self.inner
            .by_type
            .entry(service_type)
            .or_default()
            .push(service_id);
        rx
    }

    pub fn unregister(&self, service_id: &ServiceId) {
        self.inner.by_id.remove(service_id);
        for mut entry in self.inner.by_type.iter_mut() {
            entry.value_mut().retain(|id| id != service_id);
        }
    }

    /// Sends a request and waits for the reply, up to `timeout`.
    ///
    /// Target resolution uses the envelope: a `target_service_id` wins;
    /// otherwise the first live handler of `target_service_type` is
    /// chosen.
    pub async fn request(
        &self,
        message: BusMessage,
        timeout: Duration,
    ) -> Result<CommandResponse, BusError> {
        let tx = self.resolve(&message)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CommandDelivery { message, reply_tx })
            .map_err(|_| BusError::ChannelClosed("command handler"))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BusError::ReplyDropped),
            Err(_) => Err(BusError::CommandTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn resolve(
        &self,
        message: &BusMessage,
    ) -> Result<mpsc::UnboundedSender<CommandDelivery>, BusError> {
        if let Some(target_id) = &message.envelope.target_service_id {
            return self
                .inner
                .by_id
                .get(target_id)
                .map(|tx| tx.clone())
                .ok_or_else(|| BusError::NoSuchService {
                    target: target_id.to_string(),
                });
        }
        if let Some(target_type) = message.envelope.target_service_type {
            if let Some(ids) = self.inner.by_type.get(&target_type) {
                for id in ids.iter() {
                    if let Some(tx) = self.inner.by_id.get(id) {
                        return Ok(tx.clone());
                    }
                }
            }
            return Err(BusError::NoSuchService {
                target: target_type.to_string(),
            });
        }
        Err(BusError::NoSuchService {
            target: "<untargeted>".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Message, MessageType};
    use uuid::Uuid;

    fn sid(s: &str) -> ServiceId {
        ServiceId::try_new(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn request_reaches_handler_and_reply_returns() {
        let bus = CommandBus::new();
        let mut rx = bus.register(sid("dataset_manager_1"), ServiceType::DatasetManager);

        let handler = tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            assert_eq!(
                delivery.message.message_type(),
                MessageType::DatasetTimingRequest
            );
            let id = delivery.message.envelope.request_id;
            delivery.respond(CommandResponse::success(id, None));
        });

        let request = BusMessage::new(sid("timing_manager_1"), Message::DatasetTimingRequest {})
            .with_target_type(ServiceType::DatasetManager);
        let response = bus.request(request, Duration::from_secs(1)).await.unwrap();
        assert!(response.is_success());
        handler.await.unwrap();
    }

    #[tokio::test]
    async fn request_to_unknown_target_fails_fast() {
        let bus = CommandBus::new();
        let request = BusMessage::new(sid("x"), Message::DatasetTimingRequest {})
            .with_target_id(sid("nobody"));
        let err = bus.request(request, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(BusError::NoSuchService { .. })));
    }

    #[tokio::test]
    async fn request_times_out_when_handler_never_replies() {
        let bus = CommandBus::new();
        let _rx = bus.register(sid("slow"), ServiceType::Worker);
        let request =
            BusMessage::new(sid("x"), Message::DatasetTimingRequest {}).with_target_id(sid("slow"));
        let err = bus.request(request, Duration::from_millis(20)).await;
        assert!(matches!(err, Err(BusError::CommandTimeout { .. })));
    }

    #[tokio::test]
    async fn rejected_replies_round_trip() {
        let bus = CommandBus::new();
        let mut rx = bus.register(sid("ctrl"), ServiceType::SystemController);

        tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            delivery.respond(CommandResponse::rejected(Uuid::new_v4(), "not yet"));
        });

        let request = BusMessage::new(sid("x"), Message::DatasetTimingRequest {})
            .with_target_id(sid("ctrl"));
        let response = bus.request(request, Duration::from_secs(1)).await.unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error.as_deref(), Some("not yet"));
    }
}
