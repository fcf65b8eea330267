//! Channel proxies
//!
//! Each logical channel is brokered by one proxy task: a side-effect-free
//! conduit that moves messages from its frontend to its backend without
//! inspecting payloads. The event proxy fans out to matching
//! subscribers; the work proxy hands each item to exactly one reader.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bus::event_bus::SubscriberRegistry;
use crate::bus::work_queue::{deliver_or_hold, WorkQueueState};
use crate::messages::BusMessage;

/// Forwards published events to the subscriber registry until every
/// publisher handle is dropped.
pub(crate) fn spawn_event_proxy(
    mut frontend: mpsc::UnboundedReceiver<BusMessage>,
    registry: Arc<SubscriberRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = frontend.recv().await {
            registry.deliver(&message);
        }
        debug!("event proxy shut down");
    })
}

/// Forwards work items to the registered readers, round-robin, holding
/// items when no reader is available.
pub(crate) fn spawn_work_proxy(
    name: &'static str,
    mut frontend: mpsc::UnboundedReceiver<BusMessage>,
    state: Arc<Mutex<WorkQueueState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = frontend.recv().await {
            deliver_or_hold(&state, message);
        }
        debug!(queue = name, "work proxy shut down");
    })
}
