//! HTTP transport
//!
//! One keep-alive connection pool per worker, tuned for streaming:
//! Nagle off, TCP keepalive on, no automatic retries. Every attempt
//! becomes exactly one exchange because metrics are defined per attempt.

use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::clock::{wall_clock_ns, MonotonicClock};
use crate::error::ErrorDetails;
use crate::records::model::{ResponseData, TextResponse};
use crate::transport::sse::SseParser;

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Total per-request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// TCP keepalive probe interval for long-lived SSE connections.
    pub keepalive_interval: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            pool_max_idle_per_host: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    ClientBuild(String),
}

/// Raw observation of one HTTP exchange, before the worker attaches
/// credit context.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub start_perf_ns: u64,
    pub timestamp_ns: u64,
    pub recv_start_perf_ns: Option<u64>,
    pub end_perf_ns: u64,
    pub status: Option<u16>,
    pub responses: Vec<ResponseData>,
    pub error: Option<ErrorDetails>,
}

/// Connection-pooled client with timing capture.
pub struct HttpTransport {
    client: reqwest::Client,
    clock: MonotonicClock,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig, clock: MonotonicClock) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .tcp_keepalive(Some(config.keepalive_interval))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|err| TransportError::ClientBuild(err.to_string()))?;
        Ok(Self { client, clock })
    }

    /// Sends a POST and captures the full exchange. For streaming
    /// requests the SSE stream is parsed incrementally; an `event:
    /// error` message terminates reading and populates the error. When
    /// `cancel_after_ns` is set the in-flight response is abandoned that
    /// long after the send and the exchange is marked cancelled.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: String,
        streaming: bool,
        cancel_after_ns: Option<u64>,
    ) -> HttpExchange {
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, accept);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let start_perf_ns = self.clock.perf_ns();
        let mut exchange = HttpExchange {
            start_perf_ns,
            timestamp_ns: wall_clock_ns(),
            recv_start_perf_ns: None,
            end_perf_ns: start_perf_ns,
            status: None,
            responses: Vec::new(),
            error: None,
        };
        let cancel_deadline =
            cancel_after_ns.map(|delay| self.clock.instant_at(start_perf_ns + delay));

        debug!(url, streaming, "sending request");
        let response = match self.send_with_cancel(request.body(body), cancel_deadline).await {
            Ok(response) => response,
            Err(details) => {
                exchange.end_perf_ns = self.clock.perf_ns();
                exchange.error = Some(details);
                return exchange;
            }
        };

        exchange.status = Some(response.status().as_u16());
        exchange.recv_start_perf_ns = Some(self.clock.perf_ns());

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            exchange.end_perf_ns = self.clock.perf_ns();
            exchange.error = Some(ErrorDetails::new(
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("HTTPError"),
                body_text,
            ));
            return exchange;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let is_event_stream = content_type
            .as_deref()
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if streaming && is_event_stream {
            self.read_sse_stream(response, cancel_deadline, &mut exchange)
                .await;
        } else {
            self.read_full_body(response, content_type, cancel_deadline, &mut exchange)
                .await;
        }

        exchange.end_perf_ns = self.clock.perf_ns();
        exchange
    }

    /// Sends a GET and captures the whole body as a text response.
    pub async fn get(&self, url: &str, headers: &BTreeMap<String, String>) -> HttpExchange {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let start_perf_ns = self.clock.perf_ns();
        let mut exchange = HttpExchange {
            start_perf_ns,
            timestamp_ns: wall_clock_ns(),
            recv_start_perf_ns: None,
            end_perf_ns: start_perf_ns,
            status: None,
            responses: Vec::new(),
            error: None,
        };

        let response = match self.send_with_cancel(request, None).await {
            Ok(response) => response,
            Err(details) => {
                exchange.end_perf_ns = self.clock.perf_ns();
                exchange.error = Some(details);
                return exchange;
            }
        };

        exchange.status = Some(response.status().as_u16());
        exchange.recv_start_perf_ns = Some(self.clock.perf_ns());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.read_full_body(response, content_type, None, &mut exchange)
            .await;
        exchange.end_perf_ns = self.clock.perf_ns();
        exchange
    }

    async fn send_with_cancel(
        &self,
        request: reqwest::RequestBuilder,
        cancel_deadline: Option<std::time::Instant>,
    ) -> Result<reqwest::Response, ErrorDetails> {
        let send = request.send();
        match cancel_deadline {
            Some(deadline) => {
                tokio::select! {
                    result = send => result.map_err(|err| classify_reqwest_error(&err)),
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        Err(cancelled_details())
                    }
                }
            }
            None => send.await.map_err(|err| classify_reqwest_error(&err)),
        }
    }

    async fn read_sse_stream(
        &self,
        response: reqwest::Response,
        cancel_deadline: Option<std::time::Instant>,
        exchange: &mut HttpExchange,
    ) {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        loop {
            let chunk = match cancel_deadline {
                Some(deadline) => {
                    tokio::select! {
                        chunk = stream.next() => chunk,
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                            exchange.error = Some(cancelled_details());
                            return;
                        }
                    }
                }
                None => stream.next().await,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let perf_ns = self.clock.perf_ns();
                    for message in parser.push(&bytes, perf_ns) {
                        let error = message.error_details();
                        exchange.responses.push(ResponseData::Sse(message));
                        if let Some(details) = error {
                            // An error event terminates the stream.
                            exchange.error = Some(details);
                            return;
                        }
                    }
                }
                Some(Err(err)) => {
                    exchange.error = Some(classify_reqwest_error(&err));
                    return;
                }
                None => break,
            }
        }

        if let Some(message) = parser.finish(self.clock.perf_ns()) {
            let error = message.error_details();
            exchange.responses.push(ResponseData::Sse(message));
            if let Some(details) = error {
                exchange.error = Some(details);
            }
        }
    }

    async fn read_full_body(
        &self,
        response: reqwest::Response,
        content_type: Option<String>,
        cancel_deadline: Option<std::time::Instant>,
        exchange: &mut HttpExchange,
    ) {
        let text = match cancel_deadline {
            Some(deadline) => {
                tokio::select! {
                    text = response.text() => text,
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        exchange.error = Some(cancelled_details());
                        return;
                    }
                }
            }
            None => response.text().await,
        };
        match text {
            Ok(text) => {
                exchange.responses.push(ResponseData::Text(TextResponse {
                    perf_ns: self.clock.perf_ns(),
                    content_type,
                    text,
                }));
            }
            Err(err) => {
                exchange.error = Some(classify_reqwest_error(&err));
            }
        }
    }
}

fn cancelled_details() -> ErrorDetails {
    ErrorDetails::new(None, "RequestCancelled", "request cancelled by load generator")
}

/// Maps transport failures onto the error taxonomy. Never retried.
fn classify_reqwest_error(err: &reqwest::Error) -> ErrorDetails {
    let error_type = if err.is_timeout() {
        "TimeoutError"
    } else if err.is_connect() {
        "ConnectionError"
    } else if err.is_body() || err.is_decode() {
        "ResponseBodyError"
    } else {
        "RequestError"
    };
    ErrorDetails::new(err.status().map(|s| s.as_u16()), error_type, err.to_string())
}
