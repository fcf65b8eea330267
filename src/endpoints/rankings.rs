//! Rankings (reranker) endpoint
//!
//! The first text of the turn is the query; remaining texts are the
//! passages to rank.

use serde_json::{json, Value};

use crate::dataset::model::Turn;
use crate::domain_types::ModelName;

use super::{usage_of, ExtractedResponse};

pub fn build_payload(turn: &Turn, model: &ModelName) -> Value {
    let query = turn.texts.first().cloned().unwrap_or_default();
    let passages: Vec<Value> = turn
        .texts
        .iter()
        .skip(1)
        .map(|text| json!({ "text": text }))
        .collect();

    json!({
        "model": model.as_ref(),
        "query": { "text": query },
        "passages": passages,
    })
}

/// Rankings produce scores, not text; only the usage object is kept.
pub fn extract_response(body: &Value) -> ExtractedResponse {
    ExtractedResponse {
        text: None,
        usage: usage_of(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_text_is_query_rest_are_passages() {
        let turn = Turn {
            texts: vec!["q".into(), "p1".into(), "p2".into()],
            model: None,
            max_tokens: None,
            delay_ms: None,
        };
        let model = ModelName::try_new("rank-model".to_string()).unwrap();
        let payload = build_payload(&turn, &model);
        assert_eq!(payload["query"]["text"], "q");
        assert_eq!(payload["passages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn usage_passes_through() {
        let body = serde_json::json!({
            "rankings": [{ "index": 0, "logit": 1.5 }],
            "usage": { "prompt_tokens": 7 }
        });
        let extracted = extract_response(&body);
        assert!(extracted.text.is_none());
        assert_eq!(extracted.usage.unwrap()["prompt_tokens"], 7);
    }
}
