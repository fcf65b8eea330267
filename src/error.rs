//! Top-level error types for AIPerf
//!
//! Subsystems define their own error enums next to their code; this module
//! holds the crate-wide aggregate and the `ErrorDetails` value that rides
//! on request records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::BusError;

/// Error information attached to a `RequestRecord`.
///
/// Transport failures, non-2xx responses, SSE error events, and local
/// processing failures all end up here; the record itself is still
/// emitted so that every dispatched credit produces exactly one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// HTTP status code, when the error came from a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Classifier tag, e.g. `"SSEResponseError"` or `"RequestCancelled"`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
}

impl ErrorDetails {
    pub fn new(code: Option<u16>, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            error_type: Some(error_type.into()),
            message: message.into(),
        }
    }

    /// Builds details from any error value, tagged with its type name.
    pub fn from_error<E: std::error::Error>(error_type: &str, err: &E) -> Self {
        Self {
            code: None,
            error_type: Some(error_type.to_string()),
            message: err.to_string(),
        }
    }

    /// A stable key for grouping identical errors in the error summary.
    pub fn summary_key(&self) -> String {
        format!(
            "{}:{}",
            self.code.map_or_else(|| "-".to_string(), |c| c.to_string()),
            self.error_type.as_deref().unwrap_or("-"),
        )
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.error_type) {
            (Some(code), Some(t)) => write!(f, "[{code} {t}] {}", self.message),
            (Some(code), None) => write!(f, "[{code}] {}", self.message),
            (None, Some(t)) => write!(f, "[{t}] {}", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/// Crate-wide error type used at service boundaries and in the binary.
#[derive(Debug, Error)]
pub enum AiperfError {
    /// Invalid or conflicting options. Fatal at startup.
    #[error("configuration error at `{field_path}`: {message}")]
    Configuration { field_path: String, message: String },

    /// A service failed to initialize or bind its resources.
    #[error("service startup failed: {0}")]
    ServiceStartup(String),

    /// Message bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A child service reported a fatal error.
    #[error("service `{service_id}` reported a fatal error: {message}")]
    ServiceError { service_id: String, message: String },

    /// The run was aborted before completion.
    #[error("run aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl AiperfError {
    /// Shorthand for a configuration error with a field path.
    pub fn config(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field_path: field_path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_key_groups_by_code_and_type() {
        let a = ErrorDetails::new(Some(500), "InternalServerError", "boom");
        let b = ErrorDetails::new(Some(500), "InternalServerError", "different text");
        assert_eq!(a.summary_key(), b.summary_key());

        let c = ErrorDetails::new(Some(429), "RateLimited", "slow down");
        assert_ne!(a.summary_key(), c.summary_key());
    }

    #[test]
    fn display_includes_code_and_type() {
        let e = ErrorDetails::new(Some(503), "ServiceUnavailable", "try later");
        assert_eq!(e.to_string(), "[503 ServiceUnavailable] try later");
    }
}
