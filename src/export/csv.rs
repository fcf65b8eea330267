//! CSV exporters
//!
//! The summary CSV has two sections separated by a blank line:
//! per-request metrics with `avg,min,max,p50,p90,p95,p99,std` columns,
//! then system-level single-value metrics. Quoting follows RFC 4180 via
//! the csv crate. Flagged (experimental/internal) metrics are withheld.

use crate::export::ExportError;
use crate::records::metrics::MetricResult;
use crate::records::timeslice::TimesliceRow;

pub const STAT_KEYS: [&str; 8] = ["avg", "min", "max", "p50", "p90", "p95", "p99", "std"];

pub fn render_summary_csv(records: &[MetricResult]) -> Result<String, ExportError> {
    let mut request_metrics: Vec<&MetricResult> = Vec::new();
    let mut system_metrics: Vec<&MetricResult> = Vec::new();
    for metric in records {
        if !metric.exportable() {
            continue;
        }
        if metric.has_percentiles() {
            request_metrics.push(metric);
        } else {
            system_metrics.push(metric);
        }
    }
    request_metrics.sort_by(|a, b| a.tag.cmp(&b.tag));
    system_metrics.sort_by(|a, b| a.tag.cmp(&b.tag));

    let mut sections = Vec::new();
    if !request_metrics.is_empty() {
        sections.push(render_request_section(&request_metrics)?);
    }
    if !system_metrics.is_empty() {
        sections.push(render_system_section(&system_metrics)?);
    }
    Ok(sections.join("\n"))
}

fn render_request_section(metrics: &[&MetricResult]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["Metric".to_string()];
    header.extend(STAT_KEYS.iter().map(|k| k.to_string()));
    writer.write_record(&header)?;

    for metric in metrics {
        let mut row = vec![metric_display_name(metric)];
        for stat in stat_values(metric) {
            row.push(format_number(stat));
        }
        writer.write_record(&row)?;
    }
    finish(writer)
}

fn render_system_section(metrics: &[&MetricResult]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Metric", "Value"])?;
    for metric in metrics {
        writer.write_record([metric_display_name(metric), format_number(metric.avg)])?;
    }
    finish(writer)
}

pub fn render_timeslice_csv(rows: &[TimesliceRow]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["slice_index", "slice_start_ms", "metric", "stat", "value"])?;
    for row in rows {
        writer.write_record([
            row.slice_index.to_string(),
            row.slice_start_ms.to_string(),
            row.metric.clone(),
            row.stat.clone(),
            format_number(Some(row.value)),
        ])?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn stat_values(metric: &MetricResult) -> [Option<f64>; 8] {
    [
        metric.avg, metric.min, metric.max, metric.p50, metric.p90, metric.p95, metric.p99,
        metric.std,
    ]
}

/// `Header (unit)`, with unit suppressed for bare counts.
fn metric_display_name(metric: &MetricResult) -> String {
    let unit = metric.unit.to_lowercase();
    if unit.is_empty() || unit == "count" || unit == "requests" {
        metric.header.clone()
    } else {
        format!("{} ({})", metric.header, metric.unit)
    }
}

/// Integers plain, everything else with two decimals, blanks for
/// missing stats.
fn format_number(value: Option<f64>) -> String {
    match value {
        None => String::new(),
        Some(value) if (value - value.round()).abs() < 1e-9 => format!("{}", value.round() as i64),
        Some(value) => format!("{value:.2}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(tag: &str, header: &str, unit: &str) -> MetricResult {
        MetricResult {
            tag: tag.to_string(),
            header: header.to_string(),
            unit: unit.to_string(),
            count: 10,
            avg: Some(12.345),
            min: Some(1.0),
            max: Some(100.0),
            p50: Some(10.0),
            p90: Some(50.0),
            p95: Some(75.0),
            p99: Some(99.0),
            std: Some(5.5),
        }
    }

    fn counter(tag: &str, header: &str, unit: &str, value: f64) -> MetricResult {
        MetricResult {
            tag: tag.to_string(),
            header: header.to_string(),
            unit: unit.to_string(),
            count: 10,
            avg: Some(value),
            min: None,
            max: None,
            p50: None,
            p90: None,
            p95: None,
            p99: None,
            std: None,
        }
    }

    #[test]
    fn two_sections_separated_by_blank_line() {
        let records = vec![
            distribution("request_latency", "Request Latency", "ms"),
            counter("request_count", "Request Count", "requests", 10.0),
        ];
        let rendered = render_summary_csv(&records).unwrap();
        let blank_lines = rendered.lines().filter(|line| line.is_empty()).count();
        assert_eq!(blank_lines, 1);
        assert!(rendered.starts_with("Metric,avg,min,max,p50,p90,p95,p99,std"));
        assert!(rendered.contains("Metric,Value"));
        assert!(rendered.contains("Request Latency (ms),12.35,1,100,10,50,75,99,5.50"));
        // Unit suppressed for request counts.
        assert!(rendered.contains("Request Count,10"));
    }

    #[test]
    fn flagged_metrics_are_withheld() {
        let records = vec![
            distribution("request_latency", "Request Latency", "ms"),
            counter("usage_discrepancy_count", "Usage Discrepancy Count", "count", 3.0),
            distribution("inter_chunk_latency", "Inter Chunk Latency", "ms"),
        ];
        let rendered = render_summary_csv(&records).unwrap();
        assert!(!rendered.contains("Usage Discrepancy"));
        assert!(!rendered.contains("Inter Chunk"));
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let mut metric = distribution("request_latency", "Latency, total", "ms");
        metric.header = "Latency, total".to_string();
        let rendered = render_summary_csv(&[metric]).unwrap();
        assert!(rendered.contains("\"Latency, total (ms)\""));
    }

    #[test]
    fn timeslice_rows_render_in_order() {
        let rows = vec![
            TimesliceRow {
                slice_index: 0,
                slice_start_ms: 0,
                metric: "request_latency".to_string(),
                stat: "p50".to_string(),
                value: 12.0,
            },
            TimesliceRow {
                slice_index: 1,
                slice_start_ms: 1000,
                metric: "request_latency".to_string(),
                stat: "p50".to_string(),
                value: 14.5,
            },
        ];
        let rendered = render_timeslice_csv(&rows).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "slice_index,slice_start_ms,metric,stat,value");
        assert_eq!(lines[1], "0,0,request_latency,p50,12");
        assert_eq!(lines[2], "1,1000,request_latency,p50,14.50");
    }
}
