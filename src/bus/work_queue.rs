//! Load-balanced work distribution
//!
//! A single writer pushes items into a frontend queue; a proxy task
//! hands each item to exactly one of the registered readers, round-robin.
//! Items pushed before any reader registers are held, never dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::bus::proxy;
use crate::bus::BusError;
use crate::domain_types::ServiceId;
use crate::messages::BusMessage;

pub(crate) struct WorkQueueState {
    workers: Vec<(ServiceId, mpsc::UnboundedSender<BusMessage>)>,
    cursor: usize,
    /// Items received while no reader was registered.
    pending: VecDeque<BusMessage>,
}

impl WorkQueueState {
    fn new() -> Self {
        Self {
            workers: Vec::new(),
            cursor: 0,
            pending: VecDeque::new(),
        }
    }

    /// Delivers to the next live worker, evicting dead ones. Returns the
    /// item if no worker could take it.
    fn deliver(&mut self, message: BusMessage) -> Option<BusMessage> {
        let mut message = message;
        while !self.workers.is_empty() {
            let index = self.cursor % self.workers.len();
            match self.workers[index].1.send(message) {
                Ok(()) => {
                    self.cursor = (index + 1) % self.workers.len().max(1);
                    return None;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.workers.remove(index);
                    message = returned;
                }
            }
        }
        Some(message)
    }
}

pub(crate) fn deliver_or_hold(state: &Mutex<WorkQueueState>, message: BusMessage) {
    let mut state = state.lock().expect("work queue state poisoned");
    if let Some(undelivered) = state.deliver(message) {
        state.pending.push_back(undelivered);
    }
}

/// Handle to a load-balanced queue. Cheap to clone.
#[derive(Clone)]
pub struct WorkQueue {
    name: &'static str,
    frontend: mpsc::UnboundedSender<BusMessage>,
    state: Arc<Mutex<WorkQueueState>>,
}

impl WorkQueue {
    /// Creates the queue and spawns its proxy. Must be called from
    /// within a tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (frontend, frontend_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(WorkQueueState::new()));
        proxy::spawn_work_proxy(name, frontend_rx, Arc::clone(&state));
        Self {
            name,
            frontend,
            state,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pushes one item. Never blocks; fails only if the proxy has shut
    /// down.
    pub fn push(&self, message: BusMessage) -> Result<(), BusError> {
        self.frontend
            .send(message)
            .map_err(|_| BusError::ChannelClosed("work queue frontend"))
    }

    /// Registers a reader and returns its receiver. Held items are
    /// redistributed immediately.
    pub fn register_worker(&self, service_id: ServiceId) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("work queue state poisoned");
        state.workers.push((service_id, tx));
        let held: Vec<BusMessage> = state.pending.drain(..).collect();
        for message in held {
            if let Some(undelivered) = state.deliver(message) {
                state.pending.push_back(undelivered);
            }
        }
        rx
    }

    /// Removes a reader. Its queued items stay in its receiver; new
    /// items go to the remaining readers.
    pub fn unregister_worker(&self, service_id: &ServiceId) {
        let mut state = self.state.lock().expect("work queue state poisoned");
        state.workers.retain(|(id, _)| id != service_id);
    }
}
