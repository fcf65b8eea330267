//! OpenAI-style chat completions endpoint

use serde_json::{json, Value};

use crate::dataset::model::Turn;
use crate::domain_types::ModelName;

use super::{usage_of, ExtractedResponse};

pub fn build_payload(turn: &Turn, model: &ModelName, streaming: bool) -> Value {
    let messages: Vec<Value> = turn
        .texts
        .iter()
        .map(|text| json!({ "role": "user", "content": text }))
        .collect();

    let mut payload = json!({
        "model": model.as_ref(),
        "messages": messages,
        "stream": streaming,
    });
    if streaming {
        // Ask the server to attach a usage object to the final chunk.
        payload["stream_options"] = json!({ "include_usage": true });
    }
    if let Some(max_tokens) = turn.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

/// Handles both streaming chunks (`choices[].delta.content`) and full
/// bodies (`choices[].message.content`).
pub fn extract_response(body: &Value) -> ExtractedResponse {
    let text = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| {
            choice
                .pointer("/delta/content")
                .or_else(|| choice.pointer("/message/content"))
        })
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

    fn turn() -> Turn {
        Turn::from_text("hello there")
    }

    fn model() -> ModelName {
        ModelName::try_new("test-model".to_string()).unwrap()
    }

    #[test]
    fn payload_carries_messages_and_stream_flag() {
        let payload = build_payload(&turn(), &model(), true);
        assert_eq!(payload["model"], "test-model");
        assert_eq!(payload["messages"][0]["content"], "hello there");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["stream_options"]["include_usage"], true);
    }

    #[test]
    fn max_tokens_is_included_when_set() {
        let mut t = turn();
        t.max_tokens = Some(64);
        let payload = build_payload(&t, &model(), false);
        assert_eq!(payload["max_tokens"], 64);
        assert!(payload.get("stream_options").is_none());
    }

    #[test]
    fn extracts_streaming_delta() {
        let chunk = serde_json::json!({
            "choices": [{ "delta": { "content": "Hel" } }]
        });
        let extracted = extract_response(&chunk);
        assert_eq!(extracted.text.as_deref(), Some("Hel"));
        assert!(extracted.usage.is_none());
    }

    #[test]
    fn extracts_full_body_message_and_usage() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi!" } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2 }
        });
        let extracted = extract_response(&body);
        assert_eq!(extracted.text.as_deref(), Some("Hi!"));
        assert_eq!(extracted.usage.unwrap()["prompt_tokens"], 3);
    }
}
