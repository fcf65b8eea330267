//! Embeddings endpoint

use serde_json::{json, Value};

use crate::dataset::model::Turn;
use crate::domain_types::ModelName;

use super::{usage_of, ExtractedResponse};

pub fn build_payload(turn: &Turn, model: &ModelName) -> Value {
    json!({
        "model": model.as_ref(),
        "input": turn.texts,
    })
}

/// Embeddings produce no text output; only the usage object is kept.
pub fn extract_response(body: &Value) -> ExtractedResponse {
    ExtractedResponse {
        text: None,
        usage: usage_of(body),
    }
}
