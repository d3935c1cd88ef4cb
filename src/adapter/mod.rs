//! Backend adapters, one implementation per backend protocol.
//!
//! Every backend, whatever its wire protocol, is driven through the same
//! [`BackendAdapter`] contract and reports through the same [`QueryResult`].
//! That is what makes numbers from different backends comparable.
//!
//! # Capabilities
//!
//! Not every backend supports every [`QueryPattern`]. Instead of discovering
//! that when a call fails, callers ask [`BackendAdapter::supported_patterns`]
//! up front; the load tester refuses to start a run with an unsupported
//! pattern.
//!
//! # Failure model
//!
//! Adapter calls never return `Err`. Network failures, non-2xx responses and
//! malformed payloads are folded into a result with `status = error`; timeouts
//! (request timeouts and offload polling exhaustion alike) into
//! `status = timeout`. `health_check` and `list_connectors` swallow their
//! failures and answer `false` / an empty list.
//!
//! # Streaming
//!
//! Implementors only provide [`BackendAdapter::open_stream`], which hands back
//! raw chunks. The provided [`BackendAdapter::query_stream`] wraps them into a
//! [`StreamQuery`], which owns timing and finalization for every consumer.
use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::TransportError,
    metric::{Completion, PendingQuery, QueryPattern, QueryResult},
};

pub mod offload;
pub mod rest;
pub mod stream;
#[cfg(test)]
pub(crate) mod testing;

pub use offload::{OffloadPolicy, OffloadStatus, PollOutcome, poll_until_published};
pub use rest::RestSseAdapter;
pub use stream::{Chunk, ChunkSource, ChunkStream, OutputSink, StreamOutcome, StreamQuery};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Identity and liveness snapshot of one logical data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub id: String,
    pub status: String,
    pub connected_at: Option<String>,
    pub last_ping: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ConnectorInfo {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            connected_at: None,
            last_ping: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Target and limits of a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub connector_id: String,
    pub dataset: String,
    pub timeout: Duration,
    /// Optional number of rows to ask the backend for.
    pub rows: Option<u64>,
}

impl QueryRequest {
    pub fn new(connector_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            dataset: dataset.into(),
            timeout: DEFAULT_TIMEOUT,
            rows: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rows(mut self, rows: Option<u64>) -> Self {
        self.rows = rows;
        self
    }
}

/// The contract every backend implementation satisfies.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable identifier used to tag results.
    fn name(&self) -> &str;

    fn supported_patterns(&self) -> &[QueryPattern];

    fn supports(&self, pattern: QueryPattern) -> bool {
        self.supported_patterns().contains(&pattern)
    }

    /// Best-effort liveness check. Never fails, answers `false` instead.
    async fn health_check(&self) -> bool;

    /// Connectors currently known to the backend. Empty on failure.
    async fn list_connectors(&self) -> Vec<ConnectorInfo>;

    /// Request a dataset and wait for the whole response.
    async fn query_sync(&self, request: &QueryRequest) -> QueryResult;

    /// Open the raw chunk sequence of a streaming query.
    ///
    /// Backends without streaming keep the default.
    async fn open_stream(&self, _request: &QueryRequest) -> Result<ChunkSource, TransportError> {
        Err(TransportError::Unsupported {
            backend: self.name().to_string(),
            pattern: QueryPattern::Stream,
        })
    }

    /// Request a dataset as a stream of chunks.
    ///
    /// Chunks are tee'd to `sink` when one is given. Drain
    /// [`StreamQuery::chunks`] before resolving [`StreamQuery::outcome`], or
    /// use [`StreamQuery::collect`].
    async fn query_stream(&self, request: &QueryRequest, sink: Option<OutputSink>) -> StreamQuery {
        let pending = PendingQuery::start(
            self.name(),
            &request.connector_id,
            &request.dataset,
            QueryPattern::Stream,
        );

        match self.open_stream(request).await {
            Ok(source) => StreamQuery::new(pending, source, sink),
            Err(e) => {
                tracing::warn!("Stream to {} failed to open: {e}", request.connector_id);
                StreamQuery::failed(pending, e.into())
            }
        }
    }

    /// Request a dataset that the backend publishes to storage, polling until
    /// it is available and downloading it to `output` when given.
    async fn query_offload(&self, request: &QueryRequest, _output: Option<&Path>) -> QueryResult {
        PendingQuery::start(
            self.name(),
            &request.connector_id,
            &request.dataset,
            QueryPattern::Offload,
        )
        .finish(Completion::error(format!(
            "{} does not support the offload pattern",
            self.name()
        )))
    }
}
