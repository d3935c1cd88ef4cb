//! Worker pool internals of the [`LoadTester`](super::LoadTester).
//!
//! Workers claim request indices from a shared counter, so each worker holds
//! at most one request in flight and every index is dispatched exactly once.
//! Results travel back over an mpsc channel to the single coordinator that
//! owns the result buffer.
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::{
    adapter::{BackendAdapter, QueryRequest},
    metric::{Completion, PendingQuery, QueryPattern, QueryResult},
};

/// Shared, read-only state of one run plus the dispatch counter.
pub(crate) struct ExecutionContext {
    pub adapter: Arc<dyn BackendAdapter>,
    pub connector_ids: Vec<String>,
    pub dataset: String,
    pub pattern: QueryPattern,
    pub rows: Option<u64>,
    pub timeout: Duration,
    pub total: usize,
    next: AtomicUsize,
}

impl ExecutionContext {
    pub fn new(
        adapter: Arc<dyn BackendAdapter>,
        connector_ids: Vec<String>,
        dataset: String,
        pattern: QueryPattern,
        rows: Option<u64>,
        timeout: Duration,
        total: usize,
    ) -> Self {
        Self {
            adapter,
            connector_ids,
            dataset,
            pattern,
            rows,
            timeout,
            total,
            next: AtomicUsize::new(0),
        }
    }

    /// Claim the next undispatched request index.
    fn claim(&self) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        (index < self.total).then_some(index)
    }

    /// Round-robin assignment: request `i` targets `connector_ids[i % len]`.
    pub fn connector_for(&self, index: usize) -> &str {
        &self.connector_ids[index % self.connector_ids.len()]
    }

    async fn execute(&self, connector_id: &str) -> QueryResult {
        let request = QueryRequest::new(connector_id, self.dataset.as_str())
            .timeout(self.timeout)
            .rows(self.rows);

        match self.pattern {
            QueryPattern::Sync => self.adapter.query_sync(&request).await,
            QueryPattern::Stream => self.adapter.query_stream(&request, None).await.collect().await,
            QueryPattern::Offload => self.adapter.query_offload(&request, None).await,
        }
    }

    /// Error result standing in for a request whose worker failed.
    pub fn worker_fault(&self, index: usize, message: &str) -> QueryResult {
        PendingQuery::start(
            self.adapter.name(),
            self.connector_for(index),
            self.dataset.as_str(),
            self.pattern,
        )
        .finish(
            Completion::error(format!("worker fault: {message}"))
                .request_id(format!("worker-fault-{}", Uuid::new_v4())),
        )
    }
}

/// One finished request and the index it was dispatched under.
pub(crate) struct Outcome {
    pub index: usize,
    pub result: QueryResult,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawns `workers` Tokio tasks that drain the request indices of `ctx`.
///
/// A panic inside a request is caught and reported as an error result for
/// that index; the worker then moves on to the next index.
pub(crate) fn spawn_workers(
    ctx: Arc<ExecutionContext>,
    workers: usize,
    tx: mpsc::UnboundedSender<Outcome>,
) -> Vec<JoinHandle<()>> {
    (0..workers)
        .map(|i| {
            let ctx = ctx.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                tracing::debug!("Worker {i} started.");
                while let Some(index) = ctx.claim() {
                    let connector_id = ctx.connector_for(index);
                    let result = match AssertUnwindSafe(ctx.execute(connector_id)).catch_unwind().await {
                        Ok(result) => result,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            tracing::error!("Worker {i} faulted on request {index}: {message}");
                            ctx.worker_fault(index, &message)
                        }
                    };

                    if tx.send(Outcome { index, result }).is_err() {
                        tracing::debug!("Worker {i}: coordinator gone, stopping.");
                        break;
                    }
                }
                tracing::debug!("Worker {i} shutting down.");
            })
        })
        .collect()
}
