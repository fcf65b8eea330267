//! Raw and parsed inference result messages

use serde::{Deserialize, Serialize};

use crate::records::model::{ParsedResponseRecord, RequestRecord, TelemetryRecord};

/// One raw record per dispatched credit, published by the worker that
/// executed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResults {
    pub record: RequestRecord,
}

/// A parsed record, published by the records manager after endpoint
/// parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInferenceResults {
    pub record: ParsedResponseRecord,
}

/// GPU telemetry samples forwarded on the raw-records channel by an
/// external collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuTelemetryRecords {
    pub records: Vec<TelemetryRecord>,
}
