//! Endpoint converters and response extractors
//!
//! Each supported endpoint family knows how to turn a conversation turn
//! into a wire payload and how to pull text deltas and usage objects back
//! out of a response body. Dispatch is a plain match over `EndpointType`;
//! new endpoint kinds are added here, in one place.

pub mod chat;
pub mod completions;
pub mod embeddings;
pub mod rankings;

use serde::{Deserialize, Serialize};

use crate::dataset::model::Turn;
use crate::domain_types::ModelName;

/// The endpoint families the worker can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Chat,
    Completions,
    Embeddings,
    Rankings,
}

impl EndpointType {
    /// Default URL path for the endpoint family.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Chat => "/v1/chat/completions",
            Self::Completions => "/v1/completions",
            Self::Embeddings => "/v1/embeddings",
            Self::Rankings => "/v1/ranking",
        }
    }

    /// Whether the endpoint can produce an SSE stream.
    pub fn supports_streaming(&self) -> bool {
        matches!(self, Self::Chat | Self::Completions)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completions => "completions",
            Self::Embeddings => "embeddings",
            Self::Rankings => "rankings",
        }
    }
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EndpointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "completions" => Ok(Self::Completions),
            "embeddings" => Ok(Self::Embeddings),
            "rankings" => Ok(Self::Rankings),
            other => Err(format!("unknown endpoint type: {other}")),
        }
    }
}

/// Joins the base URL and the endpoint path, collapsing a duplicated
/// `/v1` segment so `http://host/v1` plus `/v1/chat/completions` yields a
/// single `/v1`.
pub fn build_url(base_url: &str, endpoint: EndpointType) -> String {
    let base = base_url.trim_end_matches('/');
    let path = endpoint.path();
    if base.ends_with("/v1") && path.starts_with("/v1/") {
        format!("{base}{}", &path[3..])
    } else {
        format!("{base}{path}")
    }
}

/// Text delta and usage object pulled out of one response payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedResponse {
    pub text: Option<String>,
    /// Server-reported usage object, passed through unchanged. Cumulative
    /// semantics are preserved for downstream metric code.
    pub usage: Option<serde_json::Value>,
}

/// Builds the wire payload for one turn.
pub fn build_payload(
    endpoint: EndpointType,
    turn: &Turn,
    model: &ModelName,
    streaming: bool,
) -> serde_json::Value {
    let model = turn.model.as_ref().unwrap_or(model);
    match endpoint {
        EndpointType::Chat => chat::build_payload(turn, model, streaming),
        EndpointType::Completions => completions::build_payload(turn, model, streaming),
        EndpointType::Embeddings => embeddings::build_payload(turn, model),
        EndpointType::Rankings => rankings::build_payload(turn, model),
    }
}

/// Extracts the text delta and usage object from one decoded response
/// body (a full JSON body, or a single SSE `data` payload).
pub fn extract_response(endpoint: EndpointType, body: &serde_json::Value) -> ExtractedResponse {
    match endpoint {
        EndpointType::Chat => chat::extract_response(body),
        EndpointType::Completions => completions::extract_response(body),
        EndpointType::Embeddings => embeddings::extract_response(body),
        EndpointType::Rankings => rankings::extract_response(body),
    }
}

pub(crate) fn usage_of(body: &serde_json::Value) -> Option<serde_json::Value> {
    body.get("usage").filter(|u| !u.is_null()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_collapses_duplicate_v1() {
        assert_eq!(
            build_url("http://localhost:8000/v1", EndpointType::Chat),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            build_url("http://localhost:8000/v1/", EndpointType::Chat),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn url_appends_path_to_bare_host() {
        assert_eq!(
            build_url("http://localhost:8000", EndpointType::Embeddings),
            "http://localhost:8000/v1/embeddings"
        );
    }

    #[test]
    fn streaming_support_by_endpoint() {
        assert!(EndpointType::Chat.supports_streaming());
        assert!(EndpointType::Completions.supports_streaming());
        assert!(!EndpointType::Embeddings.supports_streaming());
        assert!(!EndpointType::Rankings.supports_streaming());
    }

    #[test]
    fn endpoint_round_trips_from_str() {
        for kind in [
            EndpointType::Chat,
            EndpointType::Completions,
            EndpointType::Embeddings,
            EndpointType::Rankings,
        ] {
            assert_eq!(kind.as_str().parse::<EndpointType>().unwrap(), kind);
        }
    }
}
