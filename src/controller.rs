//! System controller
//!
//! Top-level supervisor: builds the bus and the conversation set, spawns
//! the child services through an explicit factory table, drives the
//! profile phase commands, reacts to fatal service errors, and tears the
//! topology down in order on completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::bus::{CommandDelivery, MessageBus, TopicFilter};
use crate::clock::MonotonicClock;
use crate::config::{ServiceConfig, UserConfig};
use crate::dataset::manager::DatasetManager;
use crate::dataset::{load_dataset, LoadedDataset};
use crate::domain_types::ServiceId;
use crate::error::AiperfError;
use crate::messages::{
    BusMessage, Command, CommandKind, CommandResponse, Message, MessageType, ProfileResults,
    ServiceType,
};
use crate::records::RecordsManager;
use crate::service::{spawn_service, Service, ServiceHandle};
use crate::timing::TimingManager;
use crate::workers::{Worker, WorkerManager};

/// One row of the service construction table.
struct ServiceCtor {
    service_type: ServiceType,
    build: Box<dyn FnOnce() -> Box<dyn Service> + Send>,
}

/// The construction table for the child services, leaves first. All
/// registration happens here at startup; there is no runtime registry.
fn service_factory(
    user_config: &Arc<UserConfig>,
    dataset: &Arc<LoadedDataset>,
) -> Vec<ServiceCtor> {
    let mut table = Vec::new();

    let ds = Arc::clone(dataset);
    table.push(ServiceCtor {
        service_type: ServiceType::DatasetManager,
        build: Box::new(move || Box::new(DatasetManager::new(ds))),
    });

    let cfg = Arc::clone(user_config);
    table.push(ServiceCtor {
        service_type: ServiceType::RecordsManager,
        build: Box::new(move || Box::new(RecordsManager::new(cfg))),
    });

    let cfg = Arc::clone(user_config);
    let ds = Arc::clone(dataset);
    table.push(ServiceCtor {
        service_type: ServiceType::TimingManager,
        build: Box::new(move || Box::new(TimingManager::new(cfg, ds))),
    });

    let cfg = Arc::clone(user_config);
    table.push(ServiceCtor {
        service_type: ServiceType::WorkerManager,
        build: Box::new(move || Box::new(WorkerManager::new(cfg))),
    });

    table
}

pub struct SystemController {
    service_id: ServiceId,
    service_config: Arc<ServiceConfig>,
    user_config: Arc<UserConfig>,
}

impl SystemController {
    /// Validates the configuration up front; conflicts are fatal before
    /// any service starts.
    pub fn new(service_config: ServiceConfig, user_config: UserConfig) -> Result<Self, AiperfError> {
        user_config.validate()?;
        Ok(Self {
            service_id: ServiceId::generate("system_controller"),
            service_config: Arc::new(service_config),
            user_config: Arc::new(user_config),
        })
    }

    /// Runs the benchmark to completion and returns the final results.
    pub async fn run(self) -> Result<ProfileResults, AiperfError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the benchmark; when `cancel` resolves the run is stopped
    /// gracefully (credits stop, in-flight requests finish, results are
    /// still exported with `was_cancelled = true`).
    pub async fn run_until(
        self,
        cancel: impl std::future::Future<Output = ()> + Send,
    ) -> Result<ProfileResults, AiperfError> {
        let clock = MonotonicClock::new();
        let bus = MessageBus::new();

        let dataset = Arc::new(
            load_dataset(&self.user_config.input, self.user_config.loadgen.random_seed)
                .map_err(|err| AiperfError::config("input", err.to_string()))?,
        );

        // Subscribe before spawning so no startup message is missed.
        let mut events = bus.events.subscribe(
            [
                MessageType::Registration,
                MessageType::ServiceError,
                MessageType::DatasetConfiguredNotification,
                MessageType::CreditsComplete,
                MessageType::CreditPhaseComplete,
                MessageType::ProfileResults,
            ]
            .into_iter()
            .flat_map(|mt| {
                TopicFilter::for_service(mt, &self.service_id, ServiceType::SystemController)
            })
            .collect(),
        );
        let mut commands = bus
            .commands
            .register(self.service_id.clone(), ServiceType::SystemController);

        let mut children: Vec<ServiceHandle> = Vec::new();
        for ctor in service_factory(&self.user_config, &dataset) {
            debug!(service_type = %ctor.service_type, "spawning service");
            children.push(spawn_service(
                (ctor.build)(),
                bus.clone(),
                Arc::clone(&self.service_config),
                clock,
            ));
        }

        let mut state = RunState::new(self.service_id.clone());
        let run_result = {
            tokio::pin!(cancel);
            let mut cancel_requested = false;
            loop {
                tokio::select! {
                    message = events.recv() => {
                        let Some(message) = message else {
                            break Err(AiperfError::Aborted("event bus closed".to_string()));
                        };
                        match state
                            .handle_event(message, &bus, &self.service_config)
                            .await
                        {
                            Ok(Some(results)) => break Ok(results),
                            Ok(None) => {}
                            Err(err) => break Err(err),
                        }
                    }
                    delivery = commands.recv() => {
                        let Some(delivery) = delivery else {
                            break Err(AiperfError::Aborted("command bus closed".to_string()));
                        };
                        state
                            .handle_command(delivery, &bus, &self.service_config, &self.user_config, clock, &mut children)
                            .await;
                    }
                    _ = &mut cancel, if !cancel_requested => {
                        cancel_requested = true;
                        warn!("cancellation requested; stopping credit issue");
                        state.request_stop(&bus, &self.service_config).await;
                    }
                }
            }
        };

        shutdown_children(children, self.service_config.shutdown_timeout()).await;

        match run_result {
            Ok(results) => {
                info!(
                    completed = results.completed,
                    was_cancelled = results.was_cancelled,
                    "profile run finished"
                );
                Ok(results)
            }
            Err(err) => Err(err),
        }
    }
}

/// Controller-side run state machine.
struct RunState {
    controller_id: ServiceId,
    registered: HashMap<ServiceType, usize>,
    dataset_configured: bool,
    expected_workers: Option<usize>,
    profile_started: bool,
}

impl RunState {
    fn new(controller_id: ServiceId) -> Self {
        Self {
            controller_id,
            registered: HashMap::new(),
            dataset_configured: false,
            expected_workers: None,
            profile_started: false,
        }
    }

    fn managers_ready(&self) -> bool {
        self.dataset_configured
            && [
                ServiceType::DatasetManager,
                ServiceType::RecordsManager,
                ServiceType::TimingManager,
                ServiceType::WorkerManager,
            ]
            .iter()
            .all(|t| self.registered.get(t).copied().unwrap_or(0) > 0)
    }

    fn workers_ready(&self) -> bool {
        match self.expected_workers {
            Some(expected) => {
                self.registered.get(&ServiceType::Worker).copied().unwrap_or(0) >= expected
            }
            None => false,
        }
    }

    async fn handle_event(
        &mut self,
        message: BusMessage,
        bus: &MessageBus,
        service_config: &Arc<ServiceConfig>,
    ) -> Result<Option<ProfileResults>, AiperfError> {
        match message.payload {
            Message::Registration(registration) => {
                debug!(
                    service_id = %message.envelope.service_id,
                    service_type = %registration.service_type,
                    "service registered"
                );
                *self.registered.entry(registration.service_type).or_insert(0) += 1;
                self.maybe_start_profile(bus, service_config).await?;
            }
            Message::DatasetConfiguredNotification(configured) => {
                info!(
                    conversations = configured.conversation_count,
                    has_schedule = configured.has_timing_schedule,
                    "dataset configured"
                );
                self.dataset_configured = true;
                self.maybe_start_profile(bus, service_config).await?;
            }
            Message::ServiceError(service_error) => {
                if service_error.fatal {
                    error!(
                        service_id = %message.envelope.service_id,
                        error = %service_error.message,
                        "fatal service error"
                    );
                    return Err(AiperfError::ServiceError {
                        service_id: message.envelope.service_id.to_string(),
                        message: service_error.message,
                    });
                }
                warn!(
                    service_id = %message.envelope.service_id,
                    error = %service_error.message,
                    "service error"
                );
            }
            Message::CreditPhaseComplete(complete) => {
                debug!(phase = %complete.phase, "phase complete");
            }
            Message::CreditsComplete { was_cancelled } => {
                info!(was_cancelled, "all credit phases complete; awaiting export");
            }
            Message::ProfileResults(results) => {
                return Ok(Some(results));
            }
            _ => {}
        }
        Ok(None)
    }

    async fn handle_command(
        &mut self,
        delivery: CommandDelivery,
        bus: &MessageBus,
        service_config: &Arc<ServiceConfig>,
        user_config: &Arc<UserConfig>,
        clock: MonotonicClock,
        children: &mut Vec<ServiceHandle>,
    ) {
        let request_id = delivery.message.envelope.request_id;
        let Message::Command(Command { command_id, kind }) = &delivery.message.payload else {
            delivery.respond(CommandResponse::rejected(request_id, "expected a command"));
            return;
        };
        let command_id = *command_id;

        match kind {
            CommandKind::SpawnWorkers { num_workers } => {
                let num_workers = *num_workers;
                info!(num_workers, "spawning workers");
                for _ in 0..num_workers {
                    children.push(spawn_service(
                        Box::new(Worker::new(Arc::clone(user_config))),
                        bus.clone(),
                        Arc::clone(service_config),
                        clock,
                    ));
                }
                self.expected_workers = Some(num_workers);
                delivery.respond(CommandResponse::success(command_id, None));
            }
            CommandKind::ShutdownWorkers { .. } => {
                // During controller-driven shutdown the pool is already
                // winding down; acknowledge either way.
                delivery.respond(CommandResponse::success(command_id, None));
            }
            _ => {
                delivery.respond(CommandResponse::rejected(command_id, "unsupported command"));
            }
        }
    }

    /// Sends ProfileConfigure then ProfileStart once every manager has
    /// registered, the dataset is configured, and the workers are up.
    async fn maybe_start_profile(
        &mut self,
        bus: &MessageBus,
        service_config: &Arc<ServiceConfig>,
    ) -> Result<(), AiperfError> {
        if self.profile_started || !self.managers_ready() || !self.workers_ready() {
            return Ok(());
        }
        self.profile_started = true;

        for kind in [CommandKind::ProfileConfigure {}, CommandKind::ProfileStart {}] {
            let request = BusMessage::new(
                self.controller_id.clone(),
                Message::Command(Command::new(kind)),
            )
            .with_target_type(ServiceType::TimingManager);
            let response = bus
                .commands
                .request(request, service_config.command_timeout())
                .await?;
            if !response.is_success() {
                return Err(AiperfError::ServiceStartup(format!(
                    "timing manager refused profile command: {}",
                    response.error.unwrap_or_default()
                )));
            }
        }
        info!("profile started");
        Ok(())
    }

    /// Asks the timing manager to stop issuing credits.
    async fn request_stop(&mut self, bus: &MessageBus, service_config: &Arc<ServiceConfig>) {
        let request = BusMessage::new(
            self.controller_id.clone(),
            Message::Command(Command::new(CommandKind::ProfileStop {
                reason: "user cancellation".to_string(),
            })),
        )
        .with_target_type(ServiceType::TimingManager);
        if let Err(err) = bus
            .commands
            .request(request, service_config.command_timeout())
            .await
        {
            warn!(error = %err, "profile stop request failed");
        }
    }
}

/// Graceful teardown in dependency order: worker manager first, then
/// the timing manager (drain), the workers (finish in-flight), the
/// records manager (flush + export), and the dataset manager last.
/// Children that miss the timeout are force-terminated.
async fn shutdown_children(children: Vec<ServiceHandle>, timeout: Duration) {
    let order = [
        ServiceType::WorkerManager,
        ServiceType::TimingManager,
        ServiceType::Worker,
        ServiceType::RecordsManager,
        ServiceType::DatasetManager,
    ];
    let mut children = children;
    for service_type in order {
        let (batch, rest): (Vec<ServiceHandle>, Vec<ServiceHandle>) = children
            .into_iter()
            .partition(|handle| handle.service_type == service_type);
        children = rest;
        for handle in &batch {
            handle.shutdown();
        }
        for handle in batch {
            let service_id = handle.service_id.clone();
            if !handle.wait_timeout(timeout).await {
                warn!(service_id = %service_id, "service missed shutdown timeout; aborted");
            }
        }
    }
    // Anything not covered by the ordering table.
    for handle in children {
        handle.shutdown();
        let _ = handle.wait_timeout(timeout).await;
    }
}
