//! Records manager service
//!
//! Consumes the raw-records stream: appends every record to the
//! append-only JSONL file, parses profiling-phase records, feeds the
//! aggregator and timeslices, publishes processing stats, and on
//! `CreditsComplete` computes the final results and hands them to the
//! export manager.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::clock::wall_clock_ns;
use crate::config::UserConfig;
use crate::domain_types::ServiceId;
use crate::export::{
    ExportManager, ProfileExportData, GPU_TELEMETRY_FILE, PROFILE_EXPORT_JSONL_FILE,
    RAW_RECORDS_DIR,
};
use crate::messages::{
    BusMessage, CreditPhase, ErrorDetailsCount, Message, MessageType, ProcessingStats,
    ProfileResults, ParsedInferenceResults, ServiceType,
};
use crate::records::metrics::{self, MetricAggregator};
use crate::records::model::RequestRecord;
use crate::records::parser::InferenceResultParser;
use crate::records::timeslice::TimesliceAggregator;
use crate::records::writer::BufferedJsonlWriter;
use crate::service::{Service, ServiceContext, ServiceResult, ServiceRuntimeError, WorkQueueKind};

/// Marker body for the self-addressed finalize notification, sent after
/// a settle delay so queued records drain before export.
const FINALIZE_MARKER: &str = "finalize_export";

pub struct RecordsManager {
    service_id: ServiceId,
    user_config: Arc<UserConfig>,
    parser: InferenceResultParser,
    aggregator: MetricAggregator,
    timeslices: Option<TimesliceAggregator>,

    raw_writer: Option<BufferedJsonlWriter>,
    parsed_writer: Option<BufferedJsonlWriter>,
    telemetry_writer: Option<BufferedJsonlWriter>,

    stats: ProcessingStats,
    errors_by_key: HashMap<String, ErrorDetailsCount>,
    last_stats_publish: Instant,

    total_expected: Option<u64>,
    profiling_start_perf_ns: Option<u64>,
    profiling_end_perf_ns: Option<u64>,
    wall_start_ns: Option<u64>,
    wall_end_ns: Option<u64>,
    was_cancelled: bool,
    exported: bool,
}

impl RecordsManager {
    pub fn new(user_config: Arc<UserConfig>) -> Self {
        let timeslices = user_config
            .output
            .timeslice_duration_ms
            .map(|ms| TimesliceAggregator::new(Duration::from_millis(ms)));
        Self {
            service_id: ServiceId::generate("records_manager"),
            user_config,
            parser: InferenceResultParser::new(),
            aggregator: MetricAggregator::new(),
            timeslices,
            raw_writer: None,
            parsed_writer: None,
            telemetry_writer: None,
            stats: ProcessingStats::default(),
            errors_by_key: HashMap::new(),
            last_stats_publish: Instant::now(),
            total_expected: None,
            profiling_start_perf_ns: None,
            profiling_end_perf_ns: None,
            wall_start_ns: None,
            wall_end_ns: None,
            was_cancelled: false,
            exported: false,
        }
    }

    async fn ingest_record(
        &mut self,
        record: RequestRecord,
        ctx: &ServiceContext,
    ) -> ServiceResult {
        if let Some(writer) = self.raw_writer.as_mut() {
            writer
                .write(&record)
                .await
                .map_err(|err| ServiceRuntimeError::Recoverable(format!("raw write failed: {err}")))?;
        }

        let worker_id = record.worker_id.clone();
        self.stats.completed += 1;
        *self.stats.worker_completed.entry(worker_id.clone()).or_insert(0) += 1;
        if let Some(details) = &record.error {
            self.stats.error_count += 1;
            *self.stats.worker_errors.entry(worker_id).or_insert(0) += 1;
            if record.credit_phase == CreditPhase::Profiling {
                self.errors_by_key
                    .entry(details.summary_key())
                    .or_insert_with(|| ErrorDetailsCount {
                        details: details.clone(),
                        count: 0,
                    })
                    .count += 1;
            }
        }

        // Warmup records are written raw but excluded from metrics.
        if record.credit_phase == CreditPhase::Profiling {
            let parsed = self.parser.parse(record);
            // Processing errors join the error summary alongside
            // transport and response errors.
            if let Some(details) = &parsed.error {
                self.errors_by_key
                    .entry(details.summary_key())
                    .or_insert_with(|| ErrorDetailsCount {
                        details: details.clone(),
                        count: 0,
                    })
                    .count += 1;
            }
            self.aggregator.record(&parsed);
            if let Some(timeslices) = self.timeslices.as_mut() {
                timeslices.record(&parsed);
            }
            if let Some(writer) = self.parsed_writer.as_mut() {
                writer.write(&parsed).await.map_err(|err| {
                    ServiceRuntimeError::Recoverable(format!("parsed write failed: {err}"))
                })?;
            }
            let _ = ctx.publish(Message::ParsedInferenceResults(ParsedInferenceResults {
                record: parsed,
            }));
        }

        self.maybe_publish_stats(ctx);
        Ok(())
    }

    fn maybe_publish_stats(&mut self, ctx: &ServiceContext) {
        if self.last_stats_publish.elapsed() < ctx.config.progress_interval() {
            return;
        }
        self.last_stats_publish = Instant::now();
        let _ = ctx.publish(Message::ProcessingStats(self.stats.clone()));
    }

    fn profiling_duration_sec(&self) -> Option<f64> {
        match (self.profiling_start_perf_ns, self.profiling_end_perf_ns) {
            (Some(start), Some(end)) if end > start => Some((end - start) as f64 / 1e9),
            _ => None,
        }
    }

    async fn finalize(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        if self.exported {
            return Ok(());
        }
        self.exported = true;

        if let Some(writer) = self.raw_writer.take() {
            if let Err(err) = writer.close().await {
                warn!(error = %err, "failed to close raw record writer");
            }
        }
        if let Some(writer) = self.parsed_writer.take() {
            if let Err(err) = writer.close().await {
                warn!(error = %err, "failed to close parsed record writer");
            }
        }
        if let Some(writer) = self.telemetry_writer.take() {
            if let Err(err) = writer.close().await {
                warn!(error = %err, "failed to close telemetry writer");
            }
        }

        let mut errors_by_type: Vec<ErrorDetailsCount> =
            self.errors_by_key.values().cloned().collect();
        errors_by_type.sort_by(|a, b| b.count.cmp(&a.count));

        // Profiling-phase successes only; warmup records never reach the
        // aggregator.
        let completed = (self.aggregator.counter(metrics::REQUEST_COUNT)
            - self.aggregator.counter(metrics::ERROR_REQUEST_COUNT))
        .max(0.0) as u64;
        let results = ProfileResults {
            records: self.aggregator.summarize(self.profiling_duration_sec()),
            total: self.total_expected,
            completed,
            start_ns: self.wall_start_ns.unwrap_or_else(wall_clock_ns),
            end_ns: self.wall_end_ns.unwrap_or_else(wall_clock_ns),
            was_cancelled: self.was_cancelled,
            errors_by_type,
        };

        let _ = ctx.publish(Message::ProcessingStats(self.stats.clone()));
        let _ = ctx.publish(Message::ProfileResults(results.clone()));

        let export_data = ProfileExportData {
            results,
            input_config: self.user_config.effective_json(),
        };
        let exporter = ExportManager::new(&self.user_config.output.artifact_dir);
        let timeslice_rows = self.timeslices.as_ref().map(|slices| slices.rows());
        match exporter
            .export_all(&export_data, timeslice_rows.as_deref())
            .await
        {
            Ok(paths) => {
                info!(artifacts = paths.len(), "export complete");
            }
            Err(err) => {
                error!(error = %err, "export failed");
                let _ = ctx.publish(Message::ServiceError(crate::messages::ServiceError {
                    message: format!("export failed: {err}"),
                    fatal: false,
                }));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Service for RecordsManager {
    fn service_id(&self) -> ServiceId {
        self.service_id.clone()
    }

    fn service_type(&self) -> ServiceType {
        ServiceType::RecordsManager
    }

    fn subscriptions(&self) -> Vec<MessageType> {
        vec![
            MessageType::CreditPhaseStart,
            MessageType::CreditPhaseComplete,
            MessageType::CreditsComplete,
            MessageType::Notification,
        ]
    }

    fn work_queue(&self) -> Option<WorkQueueKind> {
        Some(WorkQueueKind::RawRecords)
    }

    async fn init(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        let artifact_dir = &self.user_config.output.artifact_dir;
        let batch = ctx.config.record_batch_size.as_usize();

        let raw_path = artifact_dir.join(RAW_RECORDS_DIR).join(format!(
            "raw_records_{}.jsonl",
            self.service_id.sanitized()
        ));
        self.raw_writer = Some(BufferedJsonlWriter::create(&raw_path, batch).await.map_err(
            |err| ServiceRuntimeError::Init(format!("cannot open {}: {err}", raw_path.display())),
        )?);

        let parsed_path = artifact_dir.join(PROFILE_EXPORT_JSONL_FILE);
        self.parsed_writer = Some(
            BufferedJsonlWriter::create(&parsed_path, batch)
                .await
                .map_err(|err| {
                    ServiceRuntimeError::Init(format!(
                        "cannot open {}: {err}",
                        parsed_path.display()
                    ))
                })?,
        );
        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: BusMessage,
        ctx: &mut ServiceContext,
    ) -> ServiceResult {
        match message.payload {
            Message::InferenceResults(results) => {
                self.ingest_record(results.record, ctx).await?;
            }
            Message::GpuTelemetryRecords(telemetry) => {
                if self.telemetry_writer.is_none() {
                    let path = self
                        .user_config
                        .output
                        .artifact_dir
                        .join(GPU_TELEMETRY_FILE);
                    let batch = ctx.config.record_batch_size.as_usize();
                    self.telemetry_writer =
                        Some(BufferedJsonlWriter::create(&path, batch).await.map_err(
                            |err| {
                                ServiceRuntimeError::Recoverable(format!(
                                    "cannot open telemetry export: {err}"
                                ))
                            },
                        )?);
                }
                if let Some(writer) = self.telemetry_writer.as_mut() {
                    for record in &telemetry.records {
                        writer.write(record).await.map_err(|err| {
                            ServiceRuntimeError::Recoverable(format!(
                                "telemetry write failed: {err}"
                            ))
                        })?;
                    }
                }
            }
            Message::CreditPhaseStart(start) => {
                if start.phase == CreditPhase::Profiling {
                    self.profiling_start_perf_ns = Some(start.start_ns);
                    self.total_expected = start.total_expected_requests;
                    self.wall_start_ns = Some(wall_clock_ns());
                    if let Some(timeslices) = self.timeslices.as_mut() {
                        timeslices.set_origin(start.start_ns);
                    }
                }
            }
            Message::CreditPhaseComplete(complete) => {
                if complete.phase == CreditPhase::Profiling {
                    self.profiling_end_perf_ns = complete.end_ns;
                    self.wall_end_ns = Some(wall_clock_ns());
                }
            }
            Message::CreditsComplete { was_cancelled } => {
                self.was_cancelled = was_cancelled;
                // Records can still be in flight on the work queue; give
                // them a settle window before the final export. The loop
                // keeps draining while this task sleeps.
                let publisher = ctx.publisher();
                let settle = ctx.config.progress_interval().max(Duration::from_millis(200));
                let target = self.service_id.clone();
                ctx.spawn_task("finalize-settle", async move {
                    tokio::time::sleep(settle).await;
                    let _ = publisher.publish_message(
                        BusMessage::new(
                            target.clone(),
                            Message::Notification(crate::messages::Notification {
                                message: FINALIZE_MARKER.to_string(),
                            }),
                        )
                        .with_target_id(target),
                    );
                });
            }
            Message::Notification(notification) if notification.message == FINALIZE_MARKER => {
                self.finalize(ctx).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        // Shutdown before CreditsComplete still flushes buffers; export
        // happens only when the run completed.
        if !self.exported {
            if let Some(writer) = self.raw_writer.take() {
                let _ = writer.close().await;
            }
            if let Some(writer) = self.parsed_writer.take() {
                let _ = writer.close().await;
            }
            if let Some(writer) = self.telemetry_writer.take() {
                let _ = writer.close().await;
            }
        }
        let _ = ctx.publish(Message::ProcessingStats(self.stats.clone()));
        Ok(())
    }
}
