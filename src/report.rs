use std::{path::PathBuf, time::Duration};

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::{
    error::ExportError,
    metric::{QueryPattern, QueryResult},
};

/// The reduction of a completed load test.
///
/// Built once, at the end of a run, by [`LoadTestMetrics::reduce`]. It is a
/// pure data structure: no I/O happens here, [`Reporter`]s do that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestMetrics {
    pub backend: String,
    pub pattern: QueryPattern,
    pub duration_seconds: f64,

    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,

    pub total_rows: u64,
    pub total_bytes: u64,

    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub avg_ttfb_ms: f64,

    pub requests_per_second: f64,
    pub bytes_per_second: f64,
}

impl LoadTestMetrics {
    /// Reduce the results of a run that took `duration` of wall-clock time.
    ///
    /// Latency statistics cover successful results only. When nothing
    /// succeeded the sample is `[0]`, so a run without successes still
    /// reduces to zeros instead of failing.
    pub fn reduce(
        backend: impl Into<String>,
        pattern: QueryPattern,
        results: &[QueryResult],
        duration: Duration,
    ) -> Self {
        let successful: Vec<&QueryResult> = results.iter().filter(|r| r.is_success()).collect();

        let mut latencies: Vec<f64> = successful.iter().map(|r| r.total_time_ms()).collect();
        if latencies.is_empty() {
            latencies.push(0.0);
        }
        latencies.sort_by(f64::total_cmp);

        let avg_ttfb_ms = if successful.is_empty() {
            0.0
        } else {
            successful.iter().map(|r| r.ttfb_ms()).sum::<f64>() / successful.len() as f64
        };

        let total_bytes: u64 = successful.iter().map(|r| r.bytes).sum();
        let secs = duration.as_secs_f64();
        let per_second = |value: f64| if secs > 0.0 { value / secs } else { 0.0 };

        Self {
            backend: backend.into(),
            pattern,
            duration_seconds: secs,
            total_requests: results.len(),
            successful: successful.len(),
            failed: results.len() - successful.len(),
            total_rows: successful.iter().map(|r| r.rows).sum(),
            total_bytes,
            avg_latency_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
            min_latency_ms: latencies[0],
            max_latency_ms: latencies[latencies.len() - 1],
            p50_latency_ms: percentile(&latencies, 50.0),
            p95_latency_ms: percentile(&latencies, 95.0),
            p99_latency_ms: percentile(&latencies, 99.0),
            avg_ttfb_ms,
            requests_per_second: per_second(results.len() as f64),
            bytes_per_second: per_second(total_bytes as f64),
        }
    }
}

/// Linearly interpolated `p`-th percentile of an ascending `sorted` sample.
///
/// With `k = (n - 1) * p / 100`, `f = floor(k)` and `c = min(f + 1, n - 1)`
/// the result is `s[f] + (k - f) * (s[c] - s[f])`. Returns 0 for an empty
/// sample.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let k = (n - 1) as f64 * p / 100.0;
    let f = (k.floor() as usize).min(n - 1);
    let c = (f + 1).min(n - 1);
    if f == c {
        return sorted[f];
    }
    sorted[f] + (k - f as f64) * (sorted[c] - sorted[f])
}

/// The exported summary document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryExport {
    pub backend: String,
    pub pattern: QueryPattern,
    pub summary: RunSummary,
    pub latency_ms: LatencySummary,
    pub data: DataSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub duration_s: f64,
    pub requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub requests_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg_ttfb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub total_bytes: u64,
    pub total_rows: u64,
    pub bytes_per_second: f64,
}

impl From<&LoadTestMetrics> for SummaryExport {
    fn from(m: &LoadTestMetrics) -> Self {
        Self {
            backend: m.backend.clone(),
            pattern: m.pattern,
            summary: RunSummary {
                duration_s: m.duration_seconds,
                requests: m.total_requests,
                successful: m.successful,
                failed: m.failed,
                requests_per_second: m.requests_per_second,
            },
            latency_ms: LatencySummary {
                avg: m.avg_latency_ms,
                min: m.min_latency_ms,
                max: m.max_latency_ms,
                p50: m.p50_latency_ms,
                p95: m.p95_latency_ms,
                p99: m.p99_latency_ms,
                avg_ttfb: m.avg_ttfb_ms,
            },
            data: DataSummary {
                total_bytes: m.total_bytes,
                total_rows: m.total_rows,
                bytes_per_second: m.bytes_per_second,
            },
        }
    }
}

/// Consumes [`LoadTestMetrics`] and performs side effects: displaying them,
/// persisting them, sending them somewhere.
pub trait Reporter {
    fn report(&self, metrics: &LoadTestMetrics) -> impl Future<Output = Result<(), ExportError>>;
}

/// Writes the [`SummaryExport`] document as pretty JSON.
#[derive(Debug, Clone)]
pub struct JsonFileReporter {
    pub path: PathBuf,
}

impl JsonFileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reporter for JsonFileReporter {
    async fn report(&self, metrics: &LoadTestMetrics) -> Result<(), ExportError> {
        let json = serde_json::to_vec_pretty(&SummaryExport::from(metrics))?;
        tokio::fs::write(&self.path, json).await?;
        tracing::info!("Results exported to {}", self.path.display());
        Ok(())
    }
}

/// Prints results to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

const RULE: &str = "==================================================";

impl ConsoleReporter {
    pub fn render_summary(&self, m: &LoadTestMetrics) -> String {
        let mb = m.total_bytes as f64 / 1024.0 / 1024.0;
        let mut out = Vec::new();
        out.push(format!("\n{}", "Load Test Results".bold()));
        out.push(RULE.to_string());
        out.push(format!("{:<18}{}", "Backend", m.backend));
        out.push(format!("{:<18}{}", "Pattern", m.pattern));
        out.push(format!("{:<18}{:.2} s", "Duration", m.duration_seconds));
        out.push(format!("{:<18}{}", "Total Requests", m.total_requests));
        out.push(format!("{:<18}{}", "Successful", m.successful.to_string().green()));
        out.push(format!("{:<18}{}", "Failed", m.failed.to_string().red()));
        out.push(format!("{:<18}{:.2} req/s", "Throughput", m.requests_per_second));
        out.push(format!("{:<18}{mb:.2} MB", "Data Transferred"));
        out.push(String::new());
        out.push(format!("{}", "Latency Statistics (ms)".yellow()));
        for (label, value) in [
            ("Average", m.avg_latency_ms),
            ("Min", m.min_latency_ms),
            ("Max", m.max_latency_ms),
            ("P50", m.p50_latency_ms),
            ("P95", m.p95_latency_ms),
            ("P99", m.p99_latency_ms),
            ("Avg TTFB", m.avg_ttfb_ms),
        ] {
            out.push(format!("  {label:<16}{value:.2}"));
        }
        out.push(RULE.to_string());
        out.join("\n")
    }

    pub fn render_result(&self, r: &QueryResult) -> String {
        let mut out = vec![RULE.to_string()];
        out.push(format!("{:<12}{}", "Backend", r.backend));
        out.push(format!("{:<12}{}", "Connector", r.connector_id));
        out.push(format!("{:<12}{}", "Dataset", r.dataset));
        out.push(format!("{:<12}{}", "Pattern", r.pattern));
        if r.is_success() {
            out.push(format!("{:<12}{}", "Status", r.status.to_string().green()));
            out.push(format!("{:<12}{}", "Rows", r.rows));
            out.push(format!("{:<12}{}", "Bytes", r.bytes));
            out.push(format!("{:<12}{:.2} ms", "TTFB", r.ttfb_ms()));
            out.push(format!("{:<12}{:.2} ms", "Total Time", r.total_time_ms()));
            out.push(format!(
                "{:<12}{:.2} MB/s",
                "Throughput",
                r.throughput_bytes_per_sec / 1024.0 / 1024.0
            ));
        } else {
            out.push(format!("{:<12}{}", "Status", r.status.to_string().red()));
            out.push(format!(
                "{:<12}{}",
                "Error",
                r.error.as_deref().unwrap_or_default().red()
            ));
        }
        out.push(RULE.to_string());
        out.join("\n")
    }

    pub fn print_result(&self, result: &QueryResult) {
        println!("{}", self.render_result(result));
    }
}

impl Reporter for ConsoleReporter {
    async fn report(&self, metrics: &LoadTestMetrics) -> Result<(), ExportError> {
        println!("{}", self.render_summary(metrics));
        Ok(())
    }
}
