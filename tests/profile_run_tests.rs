//! End-to-end profile runs against a mocked endpoint
//!
//! Spins up the full controller topology against a wiremock server and
//! checks the results, the credit accounting invariants, and the
//! exported artifacts.

use std::path::Path;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aiperf::config::{
    ArrivalPattern, DatasetSource, EndpointConfig, LoadGenConfig, OutputConfig, SamplerKind,
    TimingMode,
};
use aiperf::domain_types::{ConcurrencyLimit, ModelName};
use aiperf::endpoints::EndpointType;
use aiperf::{ProfileResults, ServiceConfig, SystemController, UserConfig};

fn user_config(base_url: &str, artifact_dir: &Path, streaming: bool) -> UserConfig {
    UserConfig {
        endpoint: EndpointConfig {
            base_url: base_url.to_string(),
            endpoint_type: EndpointType::Chat,
            model: ModelName::try_new("test-model".to_string()).unwrap(),
            streaming,
            timeout_ms: 10_000,
            request_headers: Default::default(),
        },
        loadgen: LoadGenConfig {
            timing_mode: TimingMode::Concurrency,
            concurrency: ConcurrencyLimit::try_new(1).unwrap(),
            request_rate: None,
            arrival: ArrivalPattern::Poisson,
            warmup_request_count: None,
            warmup_duration_ms: None,
            request_count: Some(3),
            duration_ms: None,
            grace_period_ms: 5_000,
            auto_offset_timestamps: false,
            fixed_schedule_start_offset_ms: None,
            sampler: SamplerKind::Sequential,
            random_seed: Some(7),
            cancellation: None,
        },
        input: DatasetSource::Synthetic {
            conversation_count: 3,
            prompt_text: "what is the capital of France?".to_string(),
        },
        output: OutputConfig {
            artifact_dir: artifact_dir.to_path_buf(),
            timeslice_duration_ms: None,
        },
    }
}

fn service_config() -> ServiceConfig {
    let mut config = ServiceConfig::development();
    config.workers.max = Some(2);
    config
}

async fn run(config: UserConfig) -> ProfileResults {
    let controller = SystemController::new(service_config(), config).unwrap();
    tokio::time::timeout(Duration::from_secs(30), controller.run())
        .await
        .expect("run must finish")
        .expect("run must succeed")
}

fn count_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|contents| contents.lines().count())
        .unwrap_or(0)
}

fn find_raw_records_file(artifact_dir: &Path) -> std::path::PathBuf {
    let dir = artifact_dir.join("raw_records");
    std::fs::read_dir(&dir)
        .expect("raw_records directory exists")
        .map(|entry| entry.unwrap().path())
        .find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("raw_records_"))
        })
        .expect("raw records file written")
}

#[tokio::test]
async fn non_streaming_run_completes_and_exports() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Paris." } }],
            "usage": { "prompt_tokens": 8, "completion_tokens": 2 }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let results = run(user_config(&server.uri(), dir.path(), false)).await;

    assert_eq!(results.completed, 3);
    assert!(!results.was_cancelled);
    assert!(results.errors_by_type.is_empty());
    assert!(results.end_ns >= results.start_ns);

    let latency = results
        .records
        .iter()
        .find(|metric| metric.tag == "request_latency")
        .expect("latency metric present");
    assert_eq!(latency.count, 3);
    let (min, p50, p99, max) = (
        latency.min.unwrap(),
        latency.p50.unwrap(),
        latency.p99.unwrap(),
        latency.max.unwrap(),
    );
    assert!(min <= p50 && p50 <= p99 && p99 <= max);

    // Artifacts: one raw line per request, one parsed line per
    // profiling request, both summary exports.
    assert_eq!(count_lines(&find_raw_records_file(dir.path())), 3);
    assert_eq!(count_lines(&dir.path().join("profile_export.jsonl")), 3);
    let csv = std::fs::read_to_string(dir.path().join("profile_export_aiperf.csv")).unwrap();
    assert!(csv.contains("Request Latency (ms)"));
    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("profile_export_aiperf.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(json["was_cancelled"], false);
    assert_eq!(json["input_config"]["endpoint"]["model"], "test-model");
    // Wall-clock bounds come both raw and human-readable.
    assert!(json["start_time"].as_str().unwrap().starts_with("20"));
}

#[tokio::test]
async fn streaming_run_parses_sse_and_measures_ttft() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"is.\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":8,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let results = run(user_config(&server.uri(), dir.path(), true)).await;

    assert_eq!(results.completed, 3);
    assert!(results.errors_by_type.is_empty());
    assert!(results
        .records
        .iter()
        .any(|metric| metric.tag == "time_to_first_token"));
    assert!(results
        .records
        .iter()
        .any(|metric| metric.tag == "output_sequence_length"));

    // Parsed records carry the decoded text deltas.
    let parsed = std::fs::read_to_string(dir.path().join("profile_export.jsonl")).unwrap();
    let first: serde_json::Value = serde_json::from_str(parsed.lines().next().unwrap()).unwrap();
    assert_eq!(first["output_token_count"], 2);
}

#[tokio::test]
async fn sse_error_event_marks_record_failed_with_2xx_status() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"ok so far\"}}]}\n\n",
        "event: error\ndata: upstream worker died\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"never seen\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let results = run(user_config(&server.uri(), dir.path(), true)).await;

    // Every credit still returned; all records are errors.
    assert_eq!(results.completed, 0);
    let sse_errors = results
        .errors_by_type
        .iter()
        .find(|entry| entry.details.error_type.as_deref() == Some("SSEResponseError"))
        .expect("SSE error recorded");
    assert_eq!(sse_errors.count, 3);

    // Raw records keep the 2xx status alongside the parsed error, and
    // stop at the error event.
    let raw = std::fs::read_to_string(find_raw_records_file(dir.path())).unwrap();
    let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(first["status"], 200);
    assert_eq!(first["error"]["type"], "SSEResponseError");
    assert_eq!(first["responses"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn http_error_responses_are_recorded_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let results = run(user_config(&server.uri(), dir.path(), false)).await;

    assert_eq!(results.completed, 0);
    let errors: u64 = results.errors_by_type.iter().map(|e| e.count).sum();
    assert_eq!(errors, 3);
    let entry = &results.errors_by_type[0];
    assert_eq!(entry.details.code, Some(503));

    // Error runs still produce the CSV export.
    assert!(dir.path().join("profile_export_aiperf.csv").exists());
}

#[tokio::test]
async fn warmup_records_are_excluded_from_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Paris." } }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = user_config(&server.uri(), dir.path(), false);
    config.loadgen.warmup_request_count = Some(2);
    config.loadgen.request_count = Some(5);
    let results = run(config).await;

    // Profiling results cover the five profiling requests only.
    assert_eq!(results.completed, 5);
    let request_count = results
        .records
        .iter()
        .find(|metric| metric.tag == "request_count")
        .unwrap();
    assert_eq!(request_count.avg, Some(5.0));

    // The raw stream keeps everything, warmup included; the parsed
    // export is profiling-only.
    assert_eq!(count_lines(&find_raw_records_file(dir.path())), 7);
    assert_eq!(count_lines(&dir.path().join("profile_export.jsonl")), 5);
}

#[tokio::test]
async fn timeslice_exports_are_written_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Paris." } }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = user_config(&server.uri(), dir.path(), false);
    config.output.timeslice_duration_ms = Some(1_000);
    let results = run(config).await;
    assert_eq!(results.completed, 3);

    let slice_csv = dir.path().join("profile_export_timeslices.csv");
    assert!(slice_csv.exists());
    let contents = std::fs::read_to_string(slice_csv).unwrap();
    assert!(contents.starts_with("slice_index,slice_start_ms,metric,stat,value"));
}

#[tokio::test]
async fn processing_stats_accounting_matches_per_worker_counts() {
    // Invariant: records written equals the sum of per-worker completed
    // plus failed counts.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "ok" } }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = user_config(&server.uri(), dir.path(), false);
    config.loadgen.concurrency = ConcurrencyLimit::try_new(2).unwrap();
    config.loadgen.request_count = Some(8);
    let results = run(config).await;

    assert_eq!(results.completed, 8);
    let raw_lines = count_lines(&find_raw_records_file(dir.path()));
    assert_eq!(raw_lines, 8);
}
