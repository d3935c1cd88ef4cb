//! Append-only CSV log of raw query results.
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};

use crate::{error::LogError, metric::QueryResult};

pub const HEADER: [&str; 14] = [
    "timestamp",
    "backend",
    "connector_id",
    "dataset",
    "pattern",
    "status",
    "rows",
    "bytes",
    "ttfb_sec",
    "total_time_sec",
    "metadata_latency_sec",
    "transfer_latency_sec",
    "throughput_bytes_sec",
    "error",
];

/// A CSV file that results are appended to.
///
/// The header is written only when the file is new or empty, so repeated
/// appends across runs produce one header. Rows are stamped with the time
/// they are written, not the time the request was sent.
#[derive(Debug, Clone)]
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `results`, one row each. Does nothing for an empty slice.
    pub fn append(&self, results: &[QueryResult]) -> Result<(), LogError> {
        if results.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(HEADER)?;
        }

        for result in results {
            let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            writer.write_record(row(&timestamp, result))?;
        }
        writer.flush()?;

        tracing::debug!("Appended {} rows to {}", results.len(), self.path.display());
        Ok(())
    }
}

fn row(timestamp: &str, r: &QueryResult) -> [String; 14] {
    [
        timestamp.to_string(),
        r.backend.clone(),
        r.connector_id.clone(),
        r.dataset.clone(),
        r.pattern.to_string(),
        r.status.to_string(),
        r.rows.to_string(),
        r.bytes.to_string(),
        format!("{:.6}", r.ttfb.as_secs_f64()),
        format!("{:.6}", r.total_time.as_secs_f64()),
        format!("{:.6}", r.metadata_latency.as_secs_f64()),
        format!("{:.6}", r.transfer_latency.as_secs_f64()),
        format!("{:.2}", r.throughput_bytes_per_sec),
        r.error.clone().unwrap_or_default(),
    ]
}
