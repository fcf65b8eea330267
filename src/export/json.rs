//! JSON exporters
//!
//! The summary JSON carries the exportable metric results, the effective
//! input configuration, the error summary, wall-clock bounds (both raw
//! nanoseconds and RFC 3339 renderings), and the cancellation flag.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::export::{ExportError, ProfileExportData};
use crate::records::timeslice::TimesliceRow;

/// Renders a wall-clock nanosecond stamp as RFC 3339.
fn rfc3339_from_ns(ns: u64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(ns as i64).to_rfc3339()
}

pub fn render_summary_json(data: &ProfileExportData) -> Result<String, ExportError> {
    let records: Vec<&crate::records::metrics::MetricResult> = data
        .results
        .records
        .iter()
        .filter(|metric| metric.exportable())
        .collect();

    let document = json!({
        "records": records,
        "input_config": data.input_config,
        "errors_by_type": data.results.errors_by_type,
        "start_ns": data.results.start_ns,
        "end_ns": data.results.end_ns,
        "start_time": rfc3339_from_ns(data.results.start_ns),
        "end_time": rfc3339_from_ns(data.results.end_ns),
        "completed": data.results.completed,
        "total": data.results.total,
        "was_cancelled": data.results.was_cancelled,
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn render_timeslice_json(rows: &[TimesliceRow]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&json!({ "timeslices": rows }))?)
}
