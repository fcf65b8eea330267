//! Message bus substrate
//!
//! Transport only, no application logic. Four logical channels connect
//! the services: a pub/sub event bus, a targeted request/reply command
//! bus, and two load-balanced work queues (credits to workers, raw
//! records to the records manager). Each channel is brokered by a proxy
//! task that never inspects payloads.

pub mod command_bus;
pub mod event_bus;
mod proxy;
pub mod topic;
pub mod work_queue;

use thiserror::Error;

pub use command_bus::{CommandBus, CommandDelivery};
pub use event_bus::{EventBus, EventSubscription};
pub use topic::TopicFilter;
pub use work_queue::WorkQueue;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("no service registered for target `{target}`")]
    NoSuchService { target: String },

    #[error("command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("command handler dropped the reply")]
    ReplyDropped,
}

/// The four channels bundled for construction and hand-off to services.
#[derive(Clone)]
pub struct MessageBus {
    pub events: EventBus,
    pub commands: CommandBus,
    pub credit_queue: WorkQueue,
    pub records_queue: WorkQueue,
}

impl MessageBus {
    /// Creates all channels and their proxies. Must be called from
    /// within a tokio runtime.
    pub fn new() -> Self {
        Self {
            events: EventBus::new(),
            commands: CommandBus::new(),
            credit_queue: WorkQueue::new("credits"),
            records_queue: WorkQueue::new("raw_records"),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
