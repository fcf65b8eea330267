//! Legacy text completions endpoint

use serde_json::{json, Value};

use crate::dataset::model::Turn;
use crate::domain_types::ModelName;

use super::{usage_of, ExtractedResponse};

pub fn build_payload(turn: &Turn, model: &ModelName, streaming: bool) -> Value {
    let mut payload = json!({
        "model": model.as_ref(),
        "prompt": turn.texts.join("\n"),
        "stream": streaming,
    });
    if let Some(max_tokens) = turn.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

pub fn extract_response(body: &Value) -> ExtractedResponse {
    let text = body
        .pointer("/choices/0/text")
        .and_then(Value::as_str)
        .map(str::to_string);

    ExtractedResponse {
        text,
        usage: usage_of(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_joins_all_texts() {
        let turn = Turn {
            texts: vec!["one".into(), "two".into()],
            model: None,
            max_tokens: None,
            delay_ms: None,
        };
        let model = ModelName::try_new("m".to_string()).unwrap();
        let payload = build_payload(&turn, &model, false);
        assert_eq!(payload["prompt"], "one\ntwo");
    }

    #[test]
    fn extracts_choice_text() {
        let body = serde_json::json!({ "choices": [{ "text": " world" }] });
        assert_eq!(extract_response(&body).text.as_deref(), Some(" world"));
    }
}
