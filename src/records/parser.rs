//! Endpoint result parsing
//!
//! Turns a raw `RequestRecord` into a `ParsedResponseRecord`: decodes
//! text deltas per endpoint type, counts tokens, and passes usage
//! objects through untouched. `input_token_count` is computed even for
//! error records so token-count metrics stay defined. A processing
//! failure marks the record invalid but still emits it.

use tracing::debug;

use crate::endpoints::{extract_response, EndpointType};
use crate::error::ErrorDetails;
use crate::records::model::{ParsedResponse, ParsedResponseRecord, RequestRecord, ResponseData};
use crate::records::tokenizer::TokenizerCache;

/// The SSE terminal sentinel used by OpenAI-style streams.
const DONE_SENTINEL: &str = "[DONE]";

pub struct InferenceResultParser {
    tokenizers: TokenizerCache,
}

impl Default for InferenceResultParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceResultParser {
    pub fn new() -> Self {
        Self {
            tokenizers: TokenizerCache::new(),
        }
    }

    pub fn parse(&self, record: RequestRecord) -> ParsedResponseRecord {
        let input_token_count = Some(
            self.tokenizers
                .count_all(&record.model_name, &record.input_texts),
        );

        let mut responses = Vec::new();
        let mut parse_error: Option<ErrorDetails> = None;

        for response in &record.responses {
            match response {
                ResponseData::Text(text) => {
                    if text.text.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(&text.text) {
                        Ok(body) => {
                            let extracted = extract_response(record.endpoint_type, &body);
                            responses.push(ParsedResponse {
                                perf_ns: text.perf_ns,
                                text: extracted.text,
                                usage: extracted.usage,
                            });
                        }
                        Err(err) => {
                            debug!(error = %err, "unparseable response body");
                            parse_error.get_or_insert_with(|| {
                                ErrorDetails::new(
                                    record.status,
                                    "ResponseParseError",
                                    format!("malformed JSON body: {err}"),
                                )
                            });
                        }
                    }
                }
                ResponseData::Sse(message) => {
                    let Some(data) = message.data() else { continue };
                    if data.trim() == DONE_SENTINEL {
                        continue;
                    }
                    match serde_json::from_str::<serde_json::Value>(&data) {
                        Ok(body) => {
                            let extracted = extract_response(record.endpoint_type, &body);
                            responses.push(ParsedResponse {
                                perf_ns: message.perf_ns,
                                text: extracted.text,
                                usage: extracted.usage,
                            });
                        }
                        Err(err) => {
                            // Error events carry free text, not JSON.
                            if message.event() == Some("error") {
                                continue;
                            }
                            debug!(error = %err, "unparseable SSE data payload");
                            parse_error.get_or_insert_with(|| {
                                ErrorDetails::new(
                                    record.status,
                                    "ResponseParseError",
                                    format!("malformed SSE data: {err}"),
                                )
                            });
                        }
                    }
                }
            }
        }

        let output_text: String = responses
            .iter()
            .filter_map(|r| r.text.as_deref())
            .collect();
        let output_token_count = if output_text.is_empty() {
            None
        } else {
            Some(
                self.tokenizers
                    .for_model(&record.model_name)
                    .count(&output_text),
            )
        };

        let valid = record.error.is_none() && parse_error.is_none();
        ParsedResponseRecord {
            request: record,
            responses,
            input_token_count,
            output_token_count,
            valid,
            error: parse_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{ConversationId, ModelName, ServiceId};
    use crate::messages::CreditPhase;
    use crate::records::model::TextResponse;
    use crate::transport::sse::{SseField, SseMessage};
    use std::collections::BTreeMap;

    fn raw(endpoint: EndpointType, responses: Vec<ResponseData>) -> RequestRecord {
        RequestRecord {
            credit_phase: CreditPhase::Profiling,
            worker_id: ServiceId::try_new("w".to_string()).unwrap(),
            conversation_id: ConversationId::try_new("c".to_string()).unwrap(),
            turn_index: 0,
            model_name: ModelName::try_new("m".to_string()).unwrap(),
            endpoint_type: endpoint,
            input_texts: vec!["hello world input".into()],
            start_perf_ns: 1,
            timestamp_ns: 2,
            end_perf_ns: 10,
            recv_start_perf_ns: Some(5),
            credit_drop_ns: None,
            delayed_ns: None,
            pre_inference_ns: None,
            status: Some(200),
            request_headers: BTreeMap::new(),
            responses,
            error: None,
        }
    }

    fn sse(data: &str, perf_ns: u64) -> ResponseData {
        ResponseData::Sse(SseMessage {
            perf_ns,
            fields: vec![SseField {
                name: "data".to_string(),
                value: data.to_string(),
            }],
        })
    }

    #[test]
    fn parses_streaming_chat_chunks_and_skips_done() {
        let record = raw(
            EndpointType::Chat,
            vec![
                sse(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#, 3),
                sse(r#"{"choices":[{"delta":{"content":"lo"}}]}"#, 4),
                sse(
                    r#"{"choices":[],"usage":{"prompt_tokens":4,"completion_tokens":2}}"#,
                    5,
                ),
                sse(DONE_SENTINEL, 6),
            ],
        );
        let parsed = InferenceResultParser::new().parse(record);
        assert!(parsed.valid);
        assert_eq!(parsed.output_text(), "Hello");
        assert_eq!(parsed.responses.len(), 3);
        assert_eq!(parsed.final_usage().unwrap()["completion_tokens"], 2);
        assert!(parsed.output_token_count.is_some());
    }

    #[test]
    fn usage_is_passed_through_not_aggregated() {
        // Cumulative usage stays cumulative; each response keeps its own
        // object.
        let record = raw(
            EndpointType::Chat,
            vec![
                sse(r#"{"choices":[{"delta":{"content":"a"}}],"usage":{"completion_tokens":1}}"#, 3),
                sse(r#"{"choices":[{"delta":{"content":"b"}}],"usage":{"completion_tokens":2}}"#, 4),
            ],
        );
        let parsed = InferenceResultParser::new().parse(record);
        assert_eq!(parsed.responses[0].usage.as_ref().unwrap()["completion_tokens"], 1);
        assert_eq!(parsed.responses[1].usage.as_ref().unwrap()["completion_tokens"], 2);
    }

    #[test]
    fn error_record_still_counts_input_tokens() {
        let mut record = raw(EndpointType::Chat, vec![]);
        record.error = Some(ErrorDetails::new(Some(500), "InternalServerError", "boom"));
        let parsed = InferenceResultParser::new().parse(record);
        assert!(!parsed.valid);
        assert!(parsed.input_token_count.unwrap() > 0);
        assert!(parsed.output_token_count.is_none());
    }

    #[test]
    fn malformed_body_marks_record_invalid_but_emits_it() {
        let record = raw(
            EndpointType::Completions,
            vec![ResponseData::Text(TextResponse {
                perf_ns: 9,
                content_type: Some("application/json".to_string()),
                text: "{not json".to_string(),
            })],
        );
        let parsed = InferenceResultParser::new().parse(record);
        assert!(!parsed.valid);
        assert_eq!(
            parsed.error.as_ref().unwrap().error_type.as_deref(),
            Some("ResponseParseError")
        );
        assert!(parsed.input_token_count.is_some());
    }

    #[test]
    fn embeddings_body_has_usage_but_no_text() {
        let record = raw(
            EndpointType::Embeddings,
            vec![ResponseData::Text(TextResponse {
                perf_ns: 9,
                content_type: Some("application/json".to_string()),
                text: r#"{"data":[{"embedding":[0.1]}],"usage":{"prompt_tokens":3}}"#.to_string(),
            })],
        );
        let parsed = InferenceResultParser::new().parse(record);
        assert!(parsed.valid);
        assert!(parsed.output_token_count.is_none());
        assert_eq!(parsed.final_usage().unwrap()["prompt_tokens"], 3);
    }
}
