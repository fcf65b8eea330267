//! Topic encoding for pub/sub subscriptions
//!
//! A topic is `<message_type>[.<target>]` terminated by an end-sentinel
//! byte. Subscription matching is prefix-based (the substrate's native
//! behavior); the sentinel makes every filter unambiguous so that e.g. a
//! `command` filter can never match a `command_response` topic.

use crate::domain_types::ServiceId;
use crate::messages::{MessageType, ServiceType};

/// Terminates every encoded topic. Never appears inside message type or
/// target names.
pub const TOPIC_SENTINEL: char = '\u{0}';

/// Encodes the topic a message is published under.
pub fn encode(message_type: MessageType, target: Option<&str>) -> String {
    match target {
        Some(target) => format!("{}.{}{}", message_type.as_str(), target, TOPIC_SENTINEL),
        None => format!("{}{}", message_type.as_str(), TOPIC_SENTINEL),
    }
}

/// A subscription filter: an encoded topic prefix including the
/// sentinel, so matching is exact in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    prefix: String,
}

impl TopicFilter {
    /// Matches untargeted messages of one type.
    pub fn of_type(message_type: MessageType) -> Self {
        Self {
            prefix: encode(message_type, None),
        }
    }

    /// Matches messages of one type targeted at a specific service id.
    pub fn of_type_for_id(message_type: MessageType, service_id: &ServiceId) -> Self {
        let target: &str = service_id.as_ref();
        Self {
            prefix: encode(message_type, Some(target)),
        }
    }

    /// Matches messages of one type targeted at a service type.
    pub fn of_type_for_service_type(message_type: MessageType, service_type: ServiceType) -> Self {
        Self {
            prefix: encode(message_type, Some(service_type.as_str())),
        }
    }

    /// The three filters a service needs to see a message type: the
    /// untargeted topic plus the topics targeted at its id and its type.
    pub fn for_service(
        message_type: MessageType,
        service_id: &ServiceId,
        service_type: ServiceType,
    ) -> Vec<Self> {
        vec![
            Self::of_type(message_type),
            Self::of_type_for_id(message_type, service_id),
            Self::of_type_for_service_type(message_type, service_type),
        ]
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic.starts_with(&self.prefix)
    }
}
