//! Service lifecycle, command, and error messages

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of services in the benchmark topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    SystemController,
    DatasetManager,
    TimingManager,
    RecordsManager,
    WorkerManager,
    Worker,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemController => "system_controller",
            Self::DatasetManager => "dataset_manager",
            Self::TimingManager => "timing_manager",
            Self::RecordsManager => "records_manager",
            Self::WorkerManager => "worker_manager",
            Self::Worker => "worker",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// A child announces itself to the controller once its init completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub service_type: ServiceType,
}

/// Periodic liveness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub state: ServiceState,
}

/// Lifecycle state change announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Free-form operator-visible notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
}

/// A service-level failure. Fatal errors abort the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceError {
    pub message: String,
    #[serde(default)]
    pub fatal: bool,
}

/// The commands the controller and managers exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandKind {
    /// Prepare for the run: resolve datasets and build strategies.
    ProfileConfigure {},
    /// Begin issuing credits for the configured phases.
    ProfileStart {},
    /// Cancel the run: stop issuing credits and wind down.
    ProfileStop { reason: String },
    /// Ask the controller to spawn worker services.
    SpawnWorkers { num_workers: usize },
    /// Ask workers to stop accepting credits and drain.
    ShutdownWorkers { all_workers: bool },
}

/// A targeted command envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            kind,
        }
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponseStatus {
    Success,
    Failure,
    Rejected,
}

/// Reply to a `Command` or to a request/reply message, correlated by
/// `command_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: Uuid,
    pub status: CommandResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn success(command_id: Uuid, payload: Option<serde_json::Value>) -> Self {
        Self {
            command_id,
            status: CommandResponseStatus::Success,
            payload,
            error: None,
        }
    }

    pub fn failure(command_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandResponseStatus::Failure,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn rejected(command_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandResponseStatus::Rejected,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_flattened_kind() {
        let cmd = Command::new(CommandKind::SpawnWorkers { num_workers: 4 });
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "spawn_workers");
        assert_eq!(json["num_workers"], 4);
    }

    #[test]
    fn response_status_uses_screaming_case() {
        let resp = CommandResponse::rejected(Uuid::new_v4(), "phase not complete");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "REJECTED");
    }
}
