//! Artifact export
//!
//! Assembles the persisted artifacts under the artifact directory once
//! the run completes. Per-request JSONL artifacts are written
//! incrementally by the records manager; this module renders the
//! aggregated CSV/JSON summaries and timeslice exports.

pub mod csv;
pub mod json;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::messages::ProfileResults;
use crate::records::timeslice::TimesliceRow;

pub const PROFILE_EXPORT_CSV_FILE: &str = "profile_export_aiperf.csv";
pub const PROFILE_EXPORT_JSON_FILE: &str = "profile_export_aiperf.json";
pub const PROFILE_EXPORT_JSONL_FILE: &str = "profile_export.jsonl";
pub const TIMESLICE_CSV_FILE: &str = "profile_export_timeslices.csv";
pub const TIMESLICE_JSON_FILE: &str = "profile_export_timeslices.json";
pub const GPU_TELEMETRY_FILE: &str = "gpu_telemetry_export.jsonl";
pub const RAW_RECORDS_DIR: &str = "raw_records";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv rendering failed: {0}")]
    Csv(#[from] ::csv::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Everything the exporters need once the run is over.
#[derive(Debug, Clone)]
pub struct ProfileExportData {
    pub results: ProfileResults,
    /// Echo of the effective user configuration.
    pub input_config: serde_json::Value,
}

/// Renders and writes the post-run artifacts.
pub struct ExportManager {
    artifact_dir: PathBuf,
}

impl ExportManager {
    pub fn new(artifact_dir: impl AsRef<Path>) -> Self {
        Self {
            artifact_dir: artifact_dir.as_ref().to_path_buf(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Writes the CSV and JSON summaries, plus the timeslice exports
    /// when slices were collected. Returns the written paths.
    pub async fn export_all(
        &self,
        data: &ProfileExportData,
        timeslices: Option<&[TimesliceRow]>,
    ) -> Result<Vec<PathBuf>, ExportError> {
        tokio::fs::create_dir_all(&self.artifact_dir).await?;
        let mut written = Vec::new();

        let csv_path = self.artifact_dir.join(PROFILE_EXPORT_CSV_FILE);
        tokio::fs::write(&csv_path, csv::render_summary_csv(&data.results.records)?).await?;
        written.push(csv_path);

        let json_path = self.artifact_dir.join(PROFILE_EXPORT_JSON_FILE);
        tokio::fs::write(&json_path, json::render_summary_json(data)?).await?;
        written.push(json_path);

        if let Some(rows) = timeslices {
            if !rows.is_empty() {
                let slice_csv = self.artifact_dir.join(TIMESLICE_CSV_FILE);
                tokio::fs::write(&slice_csv, csv::render_timeslice_csv(rows)?).await?;
                written.push(slice_csv);

                let slice_json = self.artifact_dir.join(TIMESLICE_JSON_FILE);
                tokio::fs::write(&slice_json, json::render_timeslice_json(rows)?).await?;
                written.push(slice_json);
            }
        }

        for path in &written {
            info!(path = %path.display(), "artifact written");
        }
        Ok(written)
    }
}
