//! In-memory adapter for exercising the load tester without a network.
use std::{
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::stream;

use super::{BackendAdapter, Chunk, ChunkSource, ConnectorInfo, QueryRequest};
use crate::{
    error::TransportError,
    metric::{Completion, PendingQuery, QueryPattern, QueryResult},
};

/// What the scripted adapter does for a call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed after `delay` with `bytes` of payload.
    Succeed { delay: Duration, bytes: u64 },
    /// Fail after `delay`.
    Fail { delay: Duration, message: String },
    /// Panic inside the adapter.
    Panic,
}

pub struct ScriptedAdapter {
    name: String,
    patterns: Vec<QueryPattern>,
    connectors: Vec<String>,
    script: Box<dyn Fn(usize) -> Script + Send + Sync>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(script: impl Fn(usize) -> Script + Send + Sync + 'static) -> Self {
        Self {
            name: "scripted".to_string(),
            patterns: QueryPattern::ALL.to_vec(),
            connectors: Vec::new(),
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every call succeeds after `delay` with `bytes` of payload.
    pub fn constant(delay: Duration, bytes: u64) -> Self {
        Self::new(move |_| Script::Succeed { delay, bytes })
    }

    pub fn patterns(mut self, patterns: &[QueryPattern]) -> Self {
        self.patterns = patterns.to_vec();
        self
    }

    pub fn connectors(mut self, ids: &[&str]) -> Self {
        self.connectors = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Connector ids in the order queries were dispatched.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self, request: &QueryRequest) -> Script {
        self.seen.lock().unwrap().push(request.connector_id.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(call)
    }

    async fn run(&self, request: &QueryRequest, pattern: QueryPattern) -> QueryResult {
        let pending = PendingQuery::start(&self.name, &request.connector_id, &request.dataset, pattern);
        match self.next_script(request) {
            Script::Succeed { delay, bytes } => {
                tokio::time::sleep(delay).await;
                pending.finish(Completion::success().bytes(bytes).ttfb(delay))
            }
            Script::Fail { delay, message } => {
                tokio::time::sleep(delay).await;
                pending.finish(Completion::error(message))
            }
            Script::Panic => panic!("scripted adapter fault"),
        }
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_patterns(&self) -> &[QueryPattern] {
        &self.patterns
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn list_connectors(&self) -> Vec<ConnectorInfo> {
        self.connectors
            .iter()
            .map(|id| ConnectorInfo::new(id.clone(), "online"))
            .collect()
    }

    async fn query_sync(&self, request: &QueryRequest) -> QueryResult {
        self.run(request, QueryPattern::Sync).await
    }

    async fn open_stream(&self, request: &QueryRequest) -> Result<ChunkSource, TransportError> {
        match self.next_script(request) {
            Script::Succeed { delay, bytes } => {
                tokio::time::sleep(delay).await;
                let payload = vec![b'x'; bytes as usize];
                Ok(ChunkSource::new(stream::iter(vec![Ok(Chunk::new(payload))])))
            }
            Script::Fail { delay, message } => {
                tokio::time::sleep(delay).await;
                Err(TransportError::Malformed(message))
            }
            Script::Panic => panic!("scripted adapter fault"),
        }
    }

    async fn query_offload(&self, request: &QueryRequest, _output: Option<&Path>) -> QueryResult {
        self.run(request, QueryPattern::Offload).await
    }
}
