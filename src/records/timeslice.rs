//! Timeslice aggregation
//!
//! When a slice duration is configured, profiling-phase records are
//! additionally aggregated per contiguous time window, producing tidy
//! long-form rows for the timeslice exports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::records::metrics::MetricAggregator;
use crate::records::model::ParsedResponseRecord;

/// One tidy row of the timeslice export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesliceRow {
    pub slice_index: u64,
    pub slice_start_ms: u64,
    pub metric: String,
    pub stat: String,
    pub value: f64,
}

pub struct TimesliceAggregator {
    slice_ns: u64,
    /// Monotonic time of the profiling phase start; slice zero begins
    /// here.
    origin_ns: Option<u64>,
    slices: BTreeMap<u64, MetricAggregator>,
}

impl TimesliceAggregator {
    pub fn new(slice_duration: Duration) -> Self {
        Self {
            slice_ns: (slice_duration.as_nanos() as u64).max(1),
            origin_ns: None,
            slices: BTreeMap::new(),
        }
    }

    /// Anchors slice zero. Records arriving before this are attributed
    /// to slice zero.
    pub fn set_origin(&mut self, origin_ns: u64) {
        self.origin_ns.get_or_insert(origin_ns);
    }

    pub fn record(&mut self, parsed: &ParsedResponseRecord) {
        let origin = self
            .origin_ns
            .unwrap_or(parsed.request.start_perf_ns);
        let offset = parsed.request.start_perf_ns.saturating_sub(origin);
        let index = offset / self.slice_ns;
        self.slices
            .entry(index)
            .or_insert_with(MetricAggregator::new)
            .record(parsed);
    }

    /// Tidy long-form rows across every slice, ordered by slice then
    /// metric. Flagged metrics are excluded, matching the run-level
    /// exports.
    pub fn rows(&self) -> Vec<TimesliceRow> {
        let slice_sec = self.slice_ns as f64 / 1e9;
        let mut rows = Vec::new();
        for (index, aggregator) in &self.slices {
            let slice_start_ms = index * self.slice_ns / 1_000_000;
            for result in aggregator.summarize(Some(slice_sec)) {
                if !result.exportable() {
                    continue;
                }
                let mut push = |stat: &str, value: Option<f64>| {
                    if let Some(value) = value {
                        rows.push(TimesliceRow {
                            slice_index: *index,
                            slice_start_ms,
                            metric: result.tag.clone(),
                            stat: stat.to_string(),
                            value,
                        });
                    }
                };
                push("avg", result.avg);
                push("min", result.min);
                push("max", result.max);
                push("p50", result.p50);
                push("p90", result.p90);
                push("p95", result.p95);
                push("p99", result.p99);
                push("std", result.std);
            }
        }
        rows
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}
