use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::LogError, metric::QueryResult, metrics_log::MetricsLog};

/// In-memory buffer of results waiting to be written to the durable log.
///
/// The log is the durable store: a successful [`MetricsCollector::flush`]
/// empties the buffer. Results are collected by a single owner (the
/// coordinator of a run or a one-off query), never by workers directly.
#[derive(Debug)]
pub struct MetricsCollector {
    log: MetricsLog,
    entries: Vec<QueryResult>,
}

/// Statistics over the results currently buffered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorSummary {
    pub count: usize,
    pub successful: usize,
    pub failed: usize,
    pub avg_ttfb: Duration,
    pub min_ttfb: Duration,
    pub max_ttfb: Duration,
    pub avg_total_time: Duration,
    /// Mean over results that reported a non-zero throughput.
    pub avg_throughput_bytes_per_sec: f64,
    pub total_bytes: u64,
    pub total_rows: u64,
}

impl MetricsCollector {
    pub fn new(output_file: impl Into<PathBuf>) -> Self {
        Self {
            log: MetricsLog::new(output_file),
            entries: Vec::new(),
        }
    }

    pub fn add_result(&mut self, result: QueryResult) {
        self.entries.push(result);
    }

    pub fn add_results(&mut self, results: impl IntoIterator<Item = QueryResult>) {
        self.entries.extend(results);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every buffered result to the log, then clear the buffer.
    ///
    /// On failure the buffer is kept so the caller may retry.
    pub fn flush(&mut self) -> Result<(), LogError> {
        if self.entries.is_empty() {
            return Ok(());
        }
        self.log.append(&self.entries)?;
        self.entries.clear();
        Ok(())
    }

    /// Drop buffered results without logging them.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Success-only statistics over the buffer. Timing fields stay zero when
    /// nothing succeeded.
    pub fn summary(&self) -> CollectorSummary {
        let successful: Vec<&QueryResult> = self.entries.iter().filter(|r| r.is_success()).collect();
        let mut summary = CollectorSummary {
            count: self.entries.len(),
            successful: successful.len(),
            failed: self.entries.len() - successful.len(),
            ..Default::default()
        };
        if successful.is_empty() {
            return summary;
        }

        let n = successful.len() as u32;
        let ttfbs = successful.iter().map(|r| r.ttfb);
        summary.avg_ttfb = ttfbs.clone().sum::<Duration>() / n;
        summary.min_ttfb = ttfbs.clone().min().unwrap_or_default();
        summary.max_ttfb = ttfbs.max().unwrap_or_default();
        summary.avg_total_time = successful.iter().map(|r| r.total_time).sum::<Duration>() / n;

        let throughputs: Vec<f64> = successful
            .iter()
            .map(|r| r.throughput_bytes_per_sec)
            .filter(|t| *t > 0.0)
            .collect();
        if !throughputs.is_empty() {
            summary.avg_throughput_bytes_per_sec =
                throughputs.iter().sum::<f64>() / throughputs.len() as f64;
        }
        summary.total_bytes = successful.iter().map(|r| r.bytes).sum();
        summary.total_rows = successful.iter().map(|r| r.rows).sum();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Completion, PendingQuery, QueryPattern};

    fn ok(ttfb_ms: u64, total_ms: u64, bytes: u64) -> QueryResult {
        PendingQuery::start("system1", "aa:bb", "sales.csv", QueryPattern::Sync).finish(
            Completion::success()
                .bytes(bytes)
                .rows(bytes / 100)
                .ttfb(Duration::from_millis(ttfb_ms))
                .total_time(Duration::from_millis(total_ms)),
        )
    }

    fn failed() -> QueryResult {
        PendingQuery::start("system1", "aa:bb", "sales.csv", QueryPattern::Sync)
            .finish(Completion::error("HTTP 502: bad gateway"))
    }

    #[test]
    fn summary_covers_successes_only() {
        let mut collector = MetricsCollector::new("unused.csv");
        collector.add_results([ok(10, 100, 1000), ok(30, 300, 0), failed()]);

        let summary = collector.summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.avg_ttfb, Duration::from_millis(20));
        assert_eq!(summary.min_ttfb, Duration::from_millis(10));
        assert_eq!(summary.max_ttfb, Duration::from_millis(30));
        assert_eq!(summary.avg_total_time, Duration::from_millis(200));
        // The zero-byte result has no throughput and is left out of the mean.
        assert!((summary.avg_throughput_bytes_per_sec - 10_000.0).abs() < 1e-6);
        assert_eq!(summary.total_bytes, 1000);
        assert_eq!(summary.total_rows, 10);
    }

    #[test]
    fn summary_of_failures_has_no_timings() {
        let mut collector = MetricsCollector::new("unused.csv");
        collector.add_result(failed());

        let summary = collector.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.avg_ttfb, Duration::ZERO);
        assert_eq!(MetricsCollector::new("unused.csv").summary().count, 0);
    }

    #[test]
    fn flush_clears_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut collector = MetricsCollector::new(&path);

        collector.add_results([ok(1, 2, 3), failed()]);
        collector.flush().unwrap();
        assert!(collector.is_empty());

        // Nothing buffered, nothing written.
        collector.flush().unwrap();
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 3);
    }

    #[test]
    fn cleared_results_are_never_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut collector = MetricsCollector::new(&path);

        collector.add_results([ok(1, 2, 3), ok(4, 5, 6)]);
        assert_eq!(collector.len(), 2);
        collector.clear();
        assert!(collector.is_empty());
        assert_eq!(collector.summary().count, 0);

        collector.flush().unwrap();
        assert!(!path.exists());

        collector.add_result(failed());
        collector.flush().unwrap();
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 2);
    }
}
