//! Worker service
//!
//! A worker owns one HTTP transport and services one credit at a time:
//! resolve the turn, build the wire payload, execute the request with
//! timing capture, emit the raw record, and return the credit. Requests
//! are strictly serialized within a worker.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::UserConfig;
use crate::domain_types::ServiceId;
use crate::endpoints::{build_payload, build_url};
use crate::error::ErrorDetails;
use crate::messages::{
    BusMessage, ConversationTurnRequest, ConversationTurnResponse, CreditDrop, CreditPhase,
    CreditReturn, InferenceResults, Message, ServiceType, WorkerHealth, WorkerPhaseTaskStats,
};
use crate::records::model::RequestRecord;
use crate::service::{Service, ServiceContext, ServiceResult, ServiceRuntimeError, WorkQueueKind};
use crate::transport::{HttpExchange, HttpTransport, HttpTransportConfig};
use crate::workers::health::ProcessHealthProbe;

type SharedTaskStats = Arc<Mutex<HashMap<CreditPhase, WorkerPhaseTaskStats>>>;

pub struct Worker {
    service_id: ServiceId,
    user_config: Arc<UserConfig>,
    transport: Option<HttpTransport>,
    url: String,
    request_headers: BTreeMap<String, String>,
    task_stats: SharedTaskStats,
}

impl Worker {
    pub fn new(user_config: Arc<UserConfig>) -> Self {
        let url = build_url(
            &user_config.endpoint.base_url,
            user_config.endpoint.endpoint_type,
        );
        let request_headers = user_config.endpoint.request_headers.clone();
        Self {
            service_id: ServiceId::generate("worker"),
            user_config,
            transport: None,
            url,
            request_headers,
            task_stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_stats(&self, phase: CreditPhase, update: impl FnOnce(&mut WorkerPhaseTaskStats)) {
        if let Ok(mut stats) = self.task_stats.lock() {
            update(stats.entry(phase).or_default());
        }
    }

    async fn fetch_turn(
        &self,
        drop: &CreditDrop,
        ctx: &ServiceContext,
    ) -> Result<ConversationTurnResponse, ErrorDetails> {
        let request = BusMessage::new(
            self.service_id.clone(),
            Message::ConversationTurnRequest(ConversationTurnRequest {
                conversation_id: drop.conversation_id.clone(),
                turn_index: drop.turn_index,
            }),
        )
        .with_target_type(ServiceType::DatasetManager);

        let response = ctx
            .bus
            .commands
            .request(request, ctx.config.command_timeout())
            .await
            .map_err(|err| ErrorDetails::new(None, "TurnLookupError", err.to_string()))?;
        if !response.is_success() {
            return Err(ErrorDetails::new(
                None,
                "TurnLookupError",
                response.error.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }
        serde_json::from_value(response.payload.unwrap_or(serde_json::Value::Null))
            .map_err(|err| ErrorDetails::new(None, "TurnLookupError", err.to_string()))
    }

    async fn process_credit(&mut self, drop: CreditDrop, ctx: &mut ServiceContext) -> ServiceResult {
        let received_ns = ctx.clock.perf_ns();
        self.with_stats(drop.phase, |stats| {
            stats.total += 1;
            stats.in_progress += 1;
        });

        let endpoint = &self.user_config.endpoint;
        let streaming = endpoint.streaming && endpoint.endpoint_type.supports_streaming();

        let mut input_texts = Vec::new();
        let mut model_name = endpoint.model.clone();
        let mut pre_inference_ns = None;

        let exchange = match self.fetch_turn(&drop, ctx).await {
            Ok(turn_response) => {
                let turn = turn_response.turn;
                // Honor the configured inter-turn delay for later turns.
                if drop.turn_index > 0 {
                    if let Some(delay_ms) = turn.delay_ms {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                if let Some(model) = &turn.model {
                    model_name = model.clone();
                }
                input_texts = turn.texts.clone();
                let payload =
                    build_payload(endpoint.endpoint_type, &turn, &endpoint.model, streaming);
                let body = payload.to_string();
                pre_inference_ns = Some(ctx.clock.perf_ns().saturating_sub(received_ns));

                let transport = self.transport.as_ref().ok_or_else(|| {
                    ServiceRuntimeError::Fatal("transport not initialized".to_string())
                })?;
                transport
                    .post_json(
                        &self.url,
                        &self.request_headers,
                        body,
                        streaming,
                        drop.cancel_after_ns,
                    )
                    .await
            }
            Err(details) => {
                // The record is still emitted so the credit accounting
                // holds.
                warn!(conversation_id = %drop.conversation_id, error = %details, "turn lookup failed");
                let now = ctx.clock.perf_ns();
                HttpExchange {
                    start_perf_ns: now,
                    timestamp_ns: crate::clock::wall_clock_ns(),
                    recv_start_perf_ns: None,
                    end_perf_ns: now,
                    status: None,
                    responses: Vec::new(),
                    error: Some(details),
                }
            }
        };

        let delayed_ns = drop
            .credit_drop_ns
            .map(|scheduled| exchange.start_perf_ns.saturating_sub(scheduled))
            .filter(|delay| *delay > 0);
        let failed = exchange.error.is_some();

        let mut request_headers = BTreeMap::new();
        request_headers.insert("content-type".to_string(), "application/json".to_string());
        request_headers.insert(
            "accept".to_string(),
            if streaming {
                "text/event-stream".to_string()
            } else {
                "application/json".to_string()
            },
        );
        request_headers.extend(self.request_headers.clone());

        let record = RequestRecord {
            credit_phase: drop.phase,
            worker_id: self.service_id.clone(),
            conversation_id: drop.conversation_id.clone(),
            turn_index: drop.turn_index,
            model_name,
            endpoint_type: endpoint.endpoint_type,
            input_texts,
            start_perf_ns: exchange.start_perf_ns,
            timestamp_ns: exchange.timestamp_ns,
            end_perf_ns: exchange.end_perf_ns,
            recv_start_perf_ns: exchange.recv_start_perf_ns,
            credit_drop_ns: drop.credit_drop_ns,
            delayed_ns,
            pre_inference_ns,
            status: exchange.status,
            request_headers,
            responses: exchange.responses,
            error: exchange.error,
        };

        ctx.bus.records_queue.push(BusMessage::new(
            self.service_id.clone(),
            Message::InferenceResults(InferenceResults { record }),
        ))?;

        self.with_stats(drop.phase, |stats| {
            stats.in_progress = stats.in_progress.saturating_sub(1);
            if failed {
                stats.failed += 1;
            } else {
                stats.completed += 1;
            }
        });

        // Every dispatched credit is returned exactly once, success or
        // failure.
        ctx.publish(Message::CreditReturn(CreditReturn {
            phase: drop.phase,
            conversation_id: Some(drop.conversation_id),
            credit_drop_ns: drop.credit_drop_ns,
            delayed_ns,
            pre_inference_ns,
        }))?;

        debug!(worker_id = %self.service_id, failed, "credit processed");
        Ok(())
    }
}

#[async_trait]
impl Service for Worker {
    fn service_id(&self) -> ServiceId {
        self.service_id.clone()
    }

    fn service_type(&self) -> ServiceType {
        ServiceType::Worker
    }

    fn work_queue(&self) -> Option<WorkQueueKind> {
        Some(WorkQueueKind::Credits)
    }

    async fn init(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        let transport_config = HttpTransportConfig {
            timeout: self.user_config.endpoint.timeout(),
            ..HttpTransportConfig::default()
        };
        self.transport = Some(
            HttpTransport::new(&transport_config, ctx.clock)
                .map_err(|err| ServiceRuntimeError::Init(err.to_string()))?,
        );
        Ok(())
    }

    async fn start(&mut self, ctx: &mut ServiceContext) -> ServiceResult {
        let publisher = ctx.publisher();
        let task_stats = Arc::clone(&self.task_stats);
        let interval = Duration::from_millis(ctx.config.worker_health.health_interval_ms);
        let mut shutdown = ctx.shutdown_signal();

        ctx.spawn_task("worker-health", async move {
            let mut probe = ProcessHealthProbe::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = task_stats
                            .lock()
                            .map(|stats| stats.clone())
                            .unwrap_or_default();
                        let _ = publisher.publish(Message::WorkerHealth(WorkerHealth {
                            health: probe.sample(),
                            task_stats: snapshot,
                        }));
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: BusMessage,
        ctx: &mut ServiceContext,
    ) -> ServiceResult {
        if let Message::CreditDrop(drop) = message.payload {
            self.process_credit(drop, ctx).await?;
        }
        Ok(())
    }
}
