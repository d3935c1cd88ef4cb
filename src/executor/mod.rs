//! Executor: drives a load test against one backend adapter.
//!
//! [`LoadTester::run`] executes `total_requests` queries with at most
//! `concurrency` of them in flight, reduces the results into
//! [`LoadTestMetrics`] and appends the raw results to the durable log.
//!
//! # High-level flow
//! 1. The configured pattern is checked against the adapter's capability set;
//!    an unsupported pattern fails before anything is dispatched.
//! 2. Connectors are resolved: the configured list, else whatever the adapter
//!    lists, else the single identity `"default"`.
//! 3. `concurrency` worker tasks are spawned. Each repeatedly claims the next
//!    request index `i`, queries `connector_ids[i % len]` and sends the result
//!    to the coordinator.
//! 4. The coordinator appends results as they arrive and reports progress
//!    once per completion. Completion order is not submission order.
//! 5. Once every worker is done, the batch duration is measured, the results
//!    are reduced and the raw rows are flushed to the log.
//!
//! The executor has no global deadline: each adapter call enforces its own
//! timeout, and a hung call occupies its worker until that fires.
pub(crate) mod pool;

use std::sync::Arc;

use futures::future::join_all;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    adapter::BackendAdapter,
    aggregate::MetricsCollector,
    config::LoadTestConfig,
    error::{ConfigError, Result},
    metric::QueryResult,
    report::LoadTestMetrics,
};
use pool::{ExecutionContext, Outcome, spawn_workers};

/// Identity used when neither the configuration nor the backend names any
/// connector.
pub const DEFAULT_CONNECTOR: &str = "default";

pub struct LoadTester {
    adapter: Arc<dyn BackendAdapter>,
}

impl LoadTester {
    pub fn new(adapter: Arc<dyn BackendAdapter>) -> Self {
        Self { adapter }
    }

    /// Run a load test without progress reporting.
    pub async fn run(&self, config: &LoadTestConfig) -> Result<LoadTestMetrics> {
        self.run_with_progress(config, |_, _| {}).await
    }

    /// Run a load test, calling `progress(completed, total)` once after each
    /// completed request.
    ///
    /// `progress` is called from the coordinator only, one call at a time.
    pub async fn run_with_progress<P>(&self, config: &LoadTestConfig, mut progress: P) -> Result<LoadTestMetrics>
    where
        P: FnMut(usize, usize),
    {
        config.validate()?;
        if !self.adapter.supports(config.pattern) {
            return Err(ConfigError::UnsupportedPattern {
                pattern: config.pattern,
                backend: self.adapter.name().to_string(),
                supported: self.adapter.supported_patterns().to_vec(),
            }
            .into());
        }

        let connector_ids = self.resolve_connectors(config).await;
        let total = config.total_requests;
        tracing::info!(
            "Starting load test: {total} requests, {} concurrent, pattern={}",
            config.concurrency,
            config.pattern
        );

        let ctx = Arc::new(ExecutionContext::new(
            self.adapter.clone(),
            connector_ids,
            config.dataset.clone(),
            config.pattern,
            config.rows,
            config.timeout,
            total,
        ));

        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outcome>();
        let workers = config.concurrency.min(total);
        tracing::debug!("Spawning {workers} workers...");
        let handles = spawn_workers(ctx.clone(), workers, tx);

        let mut results: Vec<QueryResult> = Vec::with_capacity(total);
        let mut received = vec![false; total];
        while let Some(Outcome { index, result }) = rx.recv().await {
            received[index] = true;
            results.push(result);
            progress(results.len(), total);
        }

        for res in join_all(handles).await {
            if let Err(e) = res {
                tracing::error!("Worker task failed: {e}");
            }
        }

        // A worker that died outside a request leaves its claimed index behind.
        for index in (0..total).filter(|i| !received[*i]) {
            results.push(ctx.worker_fault(index, "worker exited before reporting a result"));
            progress(results.len(), total);
        }

        let duration = started.elapsed();
        let metrics = LoadTestMetrics::reduce(self.adapter.name(), config.pattern, &results, duration);

        let mut collector = MetricsCollector::new(&config.output_file);
        collector.add_results(results);
        collector.flush()?;

        tracing::info!(
            "Load test complete: {}/{} successful, {:.2} req/s, avg latency {:.2}ms",
            metrics.successful,
            metrics.total_requests,
            metrics.requests_per_second,
            metrics.avg_latency_ms
        );
        Ok(metrics)
    }

    async fn resolve_connectors(&self, config: &LoadTestConfig) -> Vec<String> {
        if !config.connector_ids.is_empty() {
            return config.connector_ids.clone();
        }

        let listed: Vec<String> = self
            .adapter
            .list_connectors()
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        if listed.is_empty() {
            tracing::warn!("No connectors listed by {}, using '{DEFAULT_CONNECTOR}'", self.adapter.name());
            vec![DEFAULT_CONNECTOR.to_string()]
        } else {
            listed
        }
    }
}
