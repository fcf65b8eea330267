//! Metric registry and aggregation
//!
//! Metric definitions live in one explicit construction table. The
//! aggregator keeps an HDR histogram per distribution metric and a plain
//! counter per aggregate metric, so memory stays bounded no matter how
//! many records flow through. Percentile stats are computed once at
//! phase end; counters are incremented per record.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::records::model::ParsedResponseRecord;

/// Flag bits attached to metric definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricFlags(u32);

impl MetricFlags {
    pub const NONE: Self = Self(0);
    pub const EXPERIMENTAL: Self = Self(1 << 0);
    pub const INTERNAL: Self = Self(1 << 1);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

/// Whether a metric is a per-request distribution or a run-level
/// aggregate count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Distribution,
    Counter,
}

/// Static definition of one metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub tag: &'static str,
    pub header: &'static str,
    pub unit: &'static str,
    pub kind: MetricKind,
    pub flags: MetricFlags,
    /// Converts stored integer values to display units.
    pub display_divisor: f64,
}

impl MetricSpec {
    /// Whether the metric appears in CSV/JSON exports.
    pub fn exportable(&self) -> bool {
        !self
            .flags
            .intersects(MetricFlags::EXPERIMENTAL.union(MetricFlags::INTERNAL))
    }
}

pub const REQUEST_LATENCY: &str = "request_latency";
pub const TIME_TO_FIRST_TOKEN: &str = "time_to_first_token";
pub const INTER_TOKEN_LATENCY: &str = "inter_token_latency";
pub const INTER_CHUNK_LATENCY: &str = "inter_chunk_latency";
pub const OUTPUT_TOKEN_THROUGHPUT_PER_REQUEST: &str = "output_token_throughput_per_request";
pub const INPUT_SEQUENCE_LENGTH: &str = "input_sequence_length";
pub const OUTPUT_SEQUENCE_LENGTH: &str = "output_sequence_length";
pub const PRE_INFERENCE_LATENCY: &str = "pre_inference_latency";
pub const CREDIT_DROP_DELAY: &str = "credit_drop_delay";
pub const REQUEST_COUNT: &str = "request_count";
pub const ERROR_REQUEST_COUNT: &str = "error_request_count";
pub const REQUEST_THROUGHPUT: &str = "request_throughput";
pub const OUTPUT_TOKEN_THROUGHPUT: &str = "output_token_throughput";
pub const TOTAL_OUTPUT_TOKENS: &str = "total_output_tokens";
pub const USAGE_DISCREPANCY_COUNT: &str = "usage_discrepancy_count";

/// The construction table of every metric this build knows about.
/// Registration happens here, at compile time; there is no runtime
/// registry to patch.
pub const METRIC_SPECS: &[MetricSpec] = &[
    MetricSpec {
        tag: REQUEST_LATENCY,
        header: "Request Latency",
        unit: "ms",
        kind: MetricKind::Distribution,
        flags: MetricFlags::NONE,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: TIME_TO_FIRST_TOKEN,
        header: "Time to First Token",
        unit: "ms",
        kind: MetricKind::Distribution,
        flags: MetricFlags::NONE,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: INTER_TOKEN_LATENCY,
        header: "Inter Token Latency",
        unit: "ms",
        kind: MetricKind::Distribution,
        flags: MetricFlags::NONE,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: INTER_CHUNK_LATENCY,
        header: "Inter Chunk Latency",
        unit: "ms",
        kind: MetricKind::Distribution,
        flags: MetricFlags::EXPERIMENTAL,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: OUTPUT_TOKEN_THROUGHPUT_PER_REQUEST,
        header: "Output Token Throughput Per Request",
        unit: "tokens/sec",
        kind: MetricKind::Distribution,
        flags: MetricFlags::NONE,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: INPUT_SEQUENCE_LENGTH,
        header: "Input Sequence Length",
        unit: "tokens",
        kind: MetricKind::Distribution,
        flags: MetricFlags::NONE,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: OUTPUT_SEQUENCE_LENGTH,
        header: "Output Sequence Length",
        unit: "tokens",
        kind: MetricKind::Distribution,
        flags: MetricFlags::NONE,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: PRE_INFERENCE_LATENCY,
        header: "Pre Inference Latency",
        unit: "ms",
        kind: MetricKind::Distribution,
        flags: MetricFlags::INTERNAL,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: CREDIT_DROP_DELAY,
        header: "Credit Drop Delay",
        unit: "ms",
        kind: MetricKind::Distribution,
        flags: MetricFlags::INTERNAL,
        display_divisor: 1_000.0,
    },
    MetricSpec {
        tag: REQUEST_COUNT,
        header: "Request Count",
        unit: "requests",
        kind: MetricKind::Counter,
        flags: MetricFlags::NONE,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: ERROR_REQUEST_COUNT,
        header: "Error Request Count",
        unit: "requests",
        kind: MetricKind::Counter,
        flags: MetricFlags::NONE,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: REQUEST_THROUGHPUT,
        header: "Request Throughput",
        unit: "requests/sec",
        kind: MetricKind::Counter,
        flags: MetricFlags::NONE,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: OUTPUT_TOKEN_THROUGHPUT,
        header: "Output Token Throughput",
        unit: "tokens/sec",
        kind: MetricKind::Counter,
        flags: MetricFlags::NONE,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: TOTAL_OUTPUT_TOKENS,
        header: "Total Output Tokens",
        unit: "tokens",
        kind: MetricKind::Counter,
        flags: MetricFlags::INTERNAL,
        display_divisor: 1.0,
    },
    MetricSpec {
        tag: USAGE_DISCREPANCY_COUNT,
        header: "Usage Discrepancy Count",
        unit: "count",
        kind: MetricKind::Counter,
        flags: MetricFlags::INTERNAL,
        display_divisor: 1.0,
    },
];

/// Looks up the spec for a tag.
pub fn spec_for(tag: &str) -> Option<&'static MetricSpec> {
    METRIC_SPECS.iter().find(|spec| spec.tag == tag)
}

/// Computed summary for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub tag: String,
    pub header: String,
    pub unit: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p50: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
}

impl MetricResult {
    /// Whether the result carries percentile stats (vs a single value).
    pub fn has_percentiles(&self) -> bool {
        self.p50.is_some() || self.p90.is_some() || self.p95.is_some() || self.p99.is_some()
    }

    /// Whether this metric belongs in CSV/JSON exports. Unknown tags are
    /// exported; only flagged definitions are withheld.
    pub fn exportable(&self) -> bool {
        spec_for(&self.tag).map_or(true, MetricSpec::exportable)
    }
}

// One hour in microseconds; latencies above this saturate rather than
// growing the histogram.
const HISTOGRAM_HIGH_US: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIGS: u8 = 3;

/// Streaming aggregator over parsed records.
#[derive(Debug)]
pub struct MetricAggregator {
    histograms: HashMap<&'static str, Histogram<u64>>,
    counters: HashMap<&'static str, f64>,
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricAggregator {
    pub fn new() -> Self {
        Self {
            histograms: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    /// Records a distribution observation in the metric's storage unit.
    pub fn observe(&mut self, tag: &'static str, value: u64) {
        let histogram = self.histograms.entry(tag).or_insert_with(|| {
            Histogram::new_with_bounds(1, HISTOGRAM_HIGH_US, HISTOGRAM_SIGFIGS)
                .unwrap_or_else(|_| Histogram::new(HISTOGRAM_SIGFIGS).expect("valid sigfigs"))
        });
        histogram.saturating_record(value.max(1));
    }

    /// Increments an aggregate counter.
    pub fn increment(&mut self, tag: &'static str, by: f64) {
        *self.counters.entry(tag).or_insert(0.0) += by;
    }

    pub fn counter(&self, tag: &str) -> f64 {
        self.counters.get(tag).copied().unwrap_or(0.0)
    }

    /// Folds one parsed record into the reservoirs and counters.
    pub fn record(&mut self, parsed: &ParsedResponseRecord) {
        self.increment(REQUEST_COUNT, 1.0);

        // Token-count metrics are defined even for error records.
        if let Some(input_tokens) = parsed.input_token_count {
            self.observe(INPUT_SEQUENCE_LENGTH, input_tokens);
        }

        if let Some(pre_ns) = parsed.request.pre_inference_ns {
            self.observe(PRE_INFERENCE_LATENCY, pre_ns / 1_000);
        }
        if let Some(delayed_ns) = parsed.request.delayed_ns {
            self.observe(CREDIT_DROP_DELAY, delayed_ns / 1_000);
        }

        if !parsed.valid || parsed.request.error.is_some() {
            self.increment(ERROR_REQUEST_COUNT, 1.0);
            return;
        }

        let latency_ns = parsed.request.latency_ns();
        self.observe(REQUEST_LATENCY, latency_ns / 1_000);

        let ttft_ns = parsed.request.time_to_first_byte_ns();
        if let Some(ttft) = ttft_ns {
            self.observe(TIME_TO_FIRST_TOKEN, ttft / 1_000);
        }

        if let Some(output_tokens) = parsed.output_token_count {
            self.observe(OUTPUT_SEQUENCE_LENGTH, output_tokens);
            self.increment(TOTAL_OUTPUT_TOKENS, output_tokens as f64);

            let latency_sec = latency_ns as f64 / 1e9;
            if latency_sec > 0.0 {
                let tokens_per_sec = output_tokens as f64 / latency_sec;
                self.observe(
                    OUTPUT_TOKEN_THROUGHPUT_PER_REQUEST,
                    (tokens_per_sec * 1_000.0) as u64,
                );
            }

            // Inter-token latency: generation time spread over the
            // tokens after the first.
            if output_tokens > 1 {
                if let Some(ttft) = ttft_ns {
                    let generation_ns = latency_ns.saturating_sub(ttft);
                    let per_token_ns = generation_ns / (output_tokens - 1);
                    self.observe(INTER_TOKEN_LATENCY, per_token_ns / 1_000);
                }
            }
        }

        // Inter-chunk latency across consecutive responses.
        for pair in parsed.responses.windows(2) {
            let delta_ns = pair[1].perf_ns.saturating_sub(pair[0].perf_ns);
            self.observe(INTER_CHUNK_LATENCY, delta_ns / 1_000);
        }

        // Diagnostic only: a mismatch between the server's reported
        // completion tokens and our own count never fails the run.
        if let (Some(usage), Some(output_tokens)) =
            (parsed.final_usage(), parsed.output_token_count)
        {
            if let Some(reported) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
                if reported != output_tokens {
                    self.increment(USAGE_DISCREPANCY_COUNT, 1.0);
                }
            }
        }
    }

    /// Computes all metric summaries. `duration_sec` enables the derived
    /// throughput metrics.
    pub fn summarize(&self, duration_sec: Option<f64>) -> Vec<MetricResult> {
        let mut results = Vec::new();

        for spec in METRIC_SPECS {
            match spec.kind {
                MetricKind::Distribution => {
                    if let Some(histogram) = self.histograms.get(spec.tag) {
                        if histogram.is_empty() {
                            continue;
                        }
                        let d = spec.display_divisor;
                        results.push(MetricResult {
                            tag: spec.tag.to_string(),
                            header: spec.header.to_string(),
                            unit: spec.unit.to_string(),
                            count: histogram.len(),
                            avg: Some(histogram.mean() / d),
                            min: Some(histogram.min() as f64 / d),
                            max: Some(histogram.max() as f64 / d),
                            p50: Some(histogram.value_at_quantile(0.50) as f64 / d),
                            p90: Some(histogram.value_at_quantile(0.90) as f64 / d),
                            p95: Some(histogram.value_at_quantile(0.95) as f64 / d),
                            p99: Some(histogram.value_at_quantile(0.99) as f64 / d),
                            std: Some(histogram.stdev() / d),
                        });
                    }
                }
                MetricKind::Counter => {
                    let value = match spec.tag {
                        REQUEST_THROUGHPUT => duration_sec.filter(|s| *s > 0.0).map(|sec| {
                            (self.counter(REQUEST_COUNT) - self.counter(ERROR_REQUEST_COUNT)) / sec
                        }),
                        OUTPUT_TOKEN_THROUGHPUT => duration_sec
                            .filter(|s| *s > 0.0)
                            .map(|sec| self.counter(TOTAL_OUTPUT_TOKENS) / sec),
                        tag => Some(self.counter(tag)),
                    };
                    let Some(value) = value else { continue };
                    results.push(MetricResult {
                        tag: spec.tag.to_string(),
                        header: spec.header.to_string(),
                        unit: spec.unit.to_string(),
                        count: self.counter(REQUEST_COUNT) as u64,
                        avg: Some(value),
                        min: None,
                        max: None,
                        p50: None,
                        p90: None,
                        p95: None,
                        p99: None,
                        std: None,
                    });
                }
            }
        }

        results
    }
}
