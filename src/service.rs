//! Service runtime
//!
//! Every role in the topology implements the one `Service` interface:
//! `init`, `start`, `stop`, plus a message dispatcher. A generic runner
//! owns the event loop: it subscribes the service's topics, registers it
//! on the command bus, drives handlers to completion one at a time, and
//! runs registered cleanup callbacks LIFO on every exit path.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, CommandDelivery, MessageBus, TopicFilter};
use crate::clock::MonotonicClock;
use crate::config::ServiceConfig;
use crate::domain_types::ServiceId;
use crate::messages::{
    BusMessage, Heartbeat, Message, MessageType, Registration, ServiceState, ServiceType, Status,
};

/// Errors surfaced by service handlers.
#[derive(Debug, Error)]
pub enum ServiceRuntimeError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// Aborts the service loop and is reported as a fatal
    /// `SERVICE_ERROR`.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Logged with context; the loop keeps running.
    #[error("{0}")]
    Recoverable(String),
}

pub type ServiceResult<T = ()> = Result<T, ServiceRuntimeError>;

/// Which load-balanced queue a service reads, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkQueueKind {
    Credits,
    RawRecords,
}

/// Publishes event-bus messages on behalf of one service. Handed to
/// background tasks that outlive a single handler call.
#[derive(Clone)]
pub struct EventPublisher {
    service_id: ServiceId,
    bus: MessageBus,
}

impl EventPublisher {
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn publish(&self, payload: Message) -> Result<(), BusError> {
        self.bus
            .events
            .publish(BusMessage::new(self.service_id.clone(), payload))
    }

    pub fn publish_message(&self, message: BusMessage) -> Result<(), BusError> {
        self.bus.events.publish(message)
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }
}

/// Per-service context handed to every hook.
pub struct ServiceContext {
    pub service_id: ServiceId,
    pub service_type: ServiceType,
    pub bus: MessageBus,
    pub config: Arc<ServiceConfig>,
    pub clock: MonotonicClock,
    shutdown_rx: watch::Receiver<bool>,
    cleanups: Vec<Box<dyn FnOnce() + Send + Sync>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceContext {
    /// Publishes a payload stamped with this service's id.
    pub fn publish(&self, payload: Message) -> Result<(), BusError> {
        self.bus
            .events
            .publish(BusMessage::new(self.service_id.clone(), payload))
    }

    /// Publishes a pre-built message (for targeted sends).
    pub fn publish_message(&self, message: BusMessage) -> Result<(), BusError> {
        self.bus.events.publish(message)
    }

    /// A cloneable publisher for background tasks.
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            service_id: self.service_id.clone(),
            bus: self.bus.clone(),
        }
    }

    /// Registers a cleanup callback. Callbacks run LIFO on stop, on all
    /// exit paths including fatal errors.
    pub fn on_cleanup(&mut self, cleanup: impl FnOnce() + Send + Sync + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Spawns a background task tied to this service's lifetime. The
    /// task is aborted if still running when the service stops.
    pub fn spawn_task(
        &mut self,
        name: &'static str,
        future: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        debug!(service_id = %self.service_id, task = name, "spawning service task");
        self.tasks.push(tokio::spawn(future));
    }

    /// A watch receiver that flips to `true` on shutdown. Background
    /// task loops check it between iterations.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

/// The single interface every service implements.
#[async_trait]
pub trait Service: Send {
    fn service_id(&self) -> ServiceId;
    fn service_type(&self) -> ServiceType;

    /// The message types this service's dispatcher handles. The runner
    /// subscribes the untargeted topic plus the topics targeted at this
    /// service's id and type.
    fn subscriptions(&self) -> Vec<MessageType> {
        Vec::new()
    }

    /// The load-balanced queue this service reads, if any.
    fn work_queue(&self) -> Option<WorkQueueKind> {
        None
    }

    /// Acquire resources. Cleanup callbacks registered here run LIFO on
    /// stop.
    async fn init(&mut self, _ctx: &mut ServiceContext) -> ServiceResult {
        Ok(())
    }

    /// Begin work. Called after registration.
    async fn start(&mut self, _ctx: &mut ServiceContext) -> ServiceResult {
        Ok(())
    }

    /// Release resources. Called before cleanups run.
    async fn stop(&mut self, _ctx: &mut ServiceContext) -> ServiceResult {
        Ok(())
    }

    /// Handles one subscribed message (or one work-queue item).
    async fn handle_message(
        &mut self,
        _message: BusMessage,
        _ctx: &mut ServiceContext,
    ) -> ServiceResult {
        Ok(())
    }

    /// Handles one command-bus request. The default rejects it.
    async fn handle_command(
        &mut self,
        delivery: CommandDelivery,
        _ctx: &mut ServiceContext,
    ) -> ServiceResult {
        let id = delivery.message.envelope.request_id;
        delivery.respond(crate::messages::CommandResponse::rejected(
            id,
            "command not supported",
        ));
        Ok(())
    }
}

/// Handle to a spawned service.
pub struct ServiceHandle {
    pub service_id: ServiceId,
    pub service_type: ServiceType,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ServiceHandle {
    /// Requests a graceful stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for the service loop to finish.
    pub async fn wait(self) {
        let _ = self.join.await;
    }

    /// Waits up to `timeout` for the service loop to finish, then
    /// force-terminates it. Returns `true` on a clean exit.
    pub async fn wait_timeout(self, timeout: std::time::Duration) -> bool {
        let abort = self.join.abort_handle();
        match tokio::time::timeout(timeout, self.join).await {
            Ok(_) => true,
            Err(_) => {
                abort.abort();
                false
            }
        }
    }

    /// Force-terminates the service.
    pub fn abort(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawns a service onto the runtime and returns its handle.
pub fn spawn_service(
    service: Box<dyn Service>,
    bus: MessageBus,
    config: Arc<ServiceConfig>,
    clock: MonotonicClock,
) -> ServiceHandle {
    let service_id = service.service_id();
    let service_type = service.service_type();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = ServiceContext {
        service_id: service_id.clone(),
        service_type,
        bus,
        config,
        clock,
        shutdown_rx,
        cleanups: Vec::new(),
        tasks: Vec::new(),
    };

    let join = tokio::spawn(run_service_loop(service, ctx));

    ServiceHandle {
        service_id,
        service_type,
        shutdown_tx,
        join,
    }
}

async fn recv_work(
    rx: &mut Option<mpsc::UnboundedReceiver<BusMessage>>,
) -> Option<BusMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_service_loop(mut service: Box<dyn Service>, mut ctx: ServiceContext) {
    let service_id = ctx.service_id.clone();
    let service_type = ctx.service_type;

    let mut filters = Vec::new();
    for message_type in service.subscriptions() {
        filters.extend(TopicFilter::for_service(
            message_type,
            &service_id,
            service_type,
        ));
    }
    let mut events = ctx.bus.events.subscribe(filters);
    let mut commands = ctx.bus.commands.register(service_id.clone(), service_type);
    let mut work = service.work_queue().map(|kind| match kind {
        WorkQueueKind::Credits => ctx.bus.credit_queue.register_worker(service_id.clone()),
        WorkQueueKind::RawRecords => ctx.bus.records_queue.register_worker(service_id.clone()),
    });

    let _ = ctx.publish(Message::Status(Status {
        state: ServiceState::Initializing,
        message: None,
    }));

    if let Err(err) = service.init(&mut ctx).await {
        fail_service(&mut service, &mut ctx, &err).await;
        return;
    }

    let _ = ctx.publish(Message::Registration(Registration { service_type }));

    if let Err(err) = service.start(&mut ctx).await {
        fail_service(&mut service, &mut ctx, &err).await;
        return;
    }

    let _ = ctx.publish(Message::Status(Status {
        state: ServiceState::Running,
        message: None,
    }));
    info!(service_id = %service_id, service_type = %service_type, "service running");

    let mut heartbeat = tokio::time::interval(ctx.config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut shutdown = ctx.shutdown_signal();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped handle counts as a shutdown request.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = events.recv() => {
                let Some(message) = message else { break };
                if let Err(err) = service.handle_message(message, &mut ctx).await {
                    if handle_loop_error(&service_id, &ctx, &err) {
                        break;
                    }
                }
            }
            delivery = commands.recv() => {
                let Some(delivery) = delivery else { break };
                if let Err(err) = service.handle_command(delivery, &mut ctx).await {
                    if handle_loop_error(&service_id, &ctx, &err) {
                        break;
                    }
                }
            }
            item = recv_work(&mut work) => {
                let Some(item) = item else { break };
                if let Err(err) = service.handle_message(item, &mut ctx).await {
                    if handle_loop_error(&service_id, &ctx, &err) {
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let _ = ctx.publish(Message::Heartbeat(Heartbeat {
                    state: ServiceState::Running,
                }));
            }
        }
    }

    shutdown_service(&mut service, &mut ctx).await;
}

/// Logs a handler error. Returns true when the loop must abort.
fn handle_loop_error(service_id: &ServiceId, ctx: &ServiceContext, err: &ServiceRuntimeError) -> bool {
    match err {
        ServiceRuntimeError::Fatal(message) => {
            error!(service_id = %service_id, error = %message, "fatal service error");
            let _ = ctx.publish(Message::ServiceError(crate::messages::ServiceError {
                message: message.clone(),
                fatal: true,
            }));
            true
        }
        other => {
            warn!(service_id = %service_id, error = %other, "handler error");
            false
        }
    }
}

async fn fail_service(
    service: &mut Box<dyn Service>,
    ctx: &mut ServiceContext,
    err: &ServiceRuntimeError,
) {
    error!(service_id = %ctx.service_id, error = %err, "service startup failed");
    let _ = ctx.publish(Message::ServiceError(crate::messages::ServiceError {
        message: err.to_string(),
        fatal: true,
    }));
    shutdown_service(service, ctx).await;
    let _ = ctx.publish(Message::Status(Status {
        state: ServiceState::Failed,
        message: Some(err.to_string()),
    }));
}

async fn shutdown_service(service: &mut Box<dyn Service>, ctx: &mut ServiceContext) {
    let _ = ctx.publish(Message::Status(Status {
        state: ServiceState::Stopping,
        message: None,
    }));

    if let Err(err) = service.stop(ctx).await {
        warn!(service_id = %ctx.service_id, error = %err, "error during service stop");
    }

    for task in ctx.tasks.drain(..) {
        task.abort();
    }

    // Cleanup callbacks run in reverse registration order.
    while let Some(cleanup) = ctx.cleanups.pop() {
        cleanup();
    }

    ctx.bus.commands.unregister(&ctx.service_id);
    let _ = ctx.publish(Message::Status(Status {
        state: ServiceState::Stopped,
        message: None,
    }));
    debug!(service_id = %ctx.service_id, "service stopped");
}
