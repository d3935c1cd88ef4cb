//! Two-phase streaming queries.
//!
//! A streaming query is consumed in two steps:
//!
//! 1. drain [`ChunkStream`], a lazy, finite, non-restartable sequence of
//!    chunks;
//! 2. resolve [`StreamOutcome`] into the final [`QueryResult`].
//!
//! The chunk stream measures everything itself (time to first byte, bytes,
//! rows, transfer time) and publishes the result once it observes the end of
//! the sequence, an error, or its own drop. Adapters only supply data
//! ([`ChunkSource`]), so no caller ever re-implements the bookkeeping.
use std::time::Duration;

use bytes::Bytes;
use futures::{
    StreamExt,
    stream::{BoxStream, Stream},
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::oneshot,
};

use crate::{
    error::TransportError,
    metric::{Completion, PendingQuery, QueryResult},
};

/// Destination that chunks are tee'd into while they are consumed.
pub type OutputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// One unit of streamed data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Bytes,
    /// Rows carried by this chunk, when the protocol reports them.
    pub rows: u64,
    /// Bytes read off the wire to produce this chunk. Differs from
    /// `data.len()` when the adapter strips framing or holds bytes back.
    pub wire_bytes: u64,
}

impl Chunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            wire_bytes: data.len() as u64,
            data,
            rows: 0,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = rows;
        self
    }

    pub fn read_from_wire(mut self, bytes: u64) -> Self {
        self.wire_bytes = bytes;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Raw chunks produced by an adapter, plus what it learned while opening them.
pub struct ChunkSource {
    chunks: BoxStream<'static, Result<Chunk, TransportError>>,
    request_id: Option<String>,
    metadata_latency: Duration,
}

impl ChunkSource {
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Chunk, TransportError>> + Send + 'static,
    {
        Self {
            chunks: chunks.boxed(),
            request_id: None,
            metadata_latency: Duration::ZERO,
        }
    }

    /// Request id assigned by the backend.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Time spent negotiating the stream before any data was requested.
    pub fn metadata_latency(mut self, latency: Duration) -> Self {
        self.metadata_latency = latency;
        self
    }
}

struct Finalizer {
    pending: PendingQuery,
    tx: oneshot::Sender<QueryResult>,
}

/// The consumer side of a streaming query.
pub struct ChunkStream {
    source: Option<BoxStream<'static, Result<Chunk, TransportError>>>,
    sink: Option<OutputSink>,
    finalizer: Option<Finalizer>,
    request_id: Option<String>,
    metadata_latency: Duration,
    ttfb: Option<Duration>,
    bytes: u64,
    rows: u64,
    chunks: u64,
}

impl ChunkStream {
    fn closed() -> Self {
        Self {
            source: None,
            sink: None,
            finalizer: None,
            request_id: None,
            metadata_latency: Duration::ZERO,
            ttfb: None,
            bytes: 0,
            rows: 0,
            chunks: 0,
        }
    }

    /// Next non-empty chunk, or `None` once the stream is exhausted.
    ///
    /// Time to first byte is taken at the first chunk that read anything off
    /// the wire, even when none of it is payload. A transport or sink error
    /// ends the stream; it is reported through the final result, not here.
    pub async fn next(&mut self) -> Option<Chunk> {
        loop {
            let item = match self.source.as_mut() {
                Some(source) => source.next().await,
                None => return None,
            };

            match item {
                Some(Ok(chunk)) => {
                    if self.ttfb.is_none() && chunk.wire_bytes > 0 {
                        self.ttfb = Some(self.since_dispatch());
                    }
                    if chunk.is_empty() {
                        continue;
                    }
                    self.chunks += 1;
                    self.bytes += chunk.len() as u64;
                    self.rows += chunk.rows;

                    if let Some(sink) = self.sink.as_mut() {
                        if let Err(e) = sink.write_all(&chunk.data).await {
                            self.close(Some(TransportError::Sink(e))).await;
                            return None;
                        }
                    }
                    return Some(chunk);
                }
                Some(Err(e)) => {
                    tracing::warn!("Stream error after {} chunks: {e}", self.chunks);
                    self.close(Some(e)).await;
                    return None;
                }
                None => {
                    self.close(None).await;
                    return None;
                }
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Chunks received so far.
    pub fn chunks_received(&self) -> u64 {
        self.chunks
    }

    fn since_dispatch(&self) -> Duration {
        self.finalizer
            .as_ref()
            .map(|f| f.pending.elapsed())
            .unwrap_or_default()
    }

    async fn close(&mut self, failure: Option<TransportError>) {
        self.source = None;
        let mut failure = failure;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.flush().await {
                if failure.is_none() {
                    failure = Some(TransportError::Sink(e));
                }
            }
        }
        self.finalize(failure.map(Completion::from));
    }

    /// Publish the final result. Runs at most once.
    fn finalize(&mut self, failure: Option<Completion>) {
        let Some(Finalizer { pending, tx }) = self.finalizer.take() else {
            return;
        };

        let total = pending.elapsed();
        let ttfb = self.ttfb.unwrap_or_default();
        let mut completion = failure
            .unwrap_or_else(Completion::success)
            .bytes(self.bytes)
            .rows(self.rows)
            .ttfb(ttfb)
            .total_time(total)
            .metadata_latency(self.metadata_latency)
            .transfer_latency(if self.ttfb.is_some() {
                total.saturating_sub(ttfb)
            } else {
                Duration::ZERO
            });
        if let Some(id) = self.request_id.take() {
            completion = completion.request_id(id);
        }

        // The outcome may have been dropped; nobody is waiting then.
        let _ = tx.send(pending.finish(completion));
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if self.finalizer.is_some() {
            self.source = None;
            self.finalize(Some(Completion::error(
                "stream dropped before it was exhausted",
            )));
        }
    }
}

/// Resolves to the final [`QueryResult`] once the paired [`ChunkStream`] is
/// exhausted or dropped.
pub struct StreamOutcome {
    rx: oneshot::Receiver<QueryResult>,
    fallback: PendingQuery,
}

impl StreamOutcome {
    pub async fn resolve(self) -> QueryResult {
        let StreamOutcome { rx, fallback } = self;
        match rx.await {
            Ok(result) => result,
            Err(_) => fallback.finish(Completion::error("stream closed without a final result")),
        }
    }
}

/// A streaming query: the chunk sequence and the handle to its final result.
pub struct StreamQuery {
    pub chunks: ChunkStream,
    pub outcome: StreamOutcome,
}

impl StreamQuery {
    pub fn new(pending: PendingQuery, source: ChunkSource, sink: Option<OutputSink>) -> Self {
        let (tx, rx) = oneshot::channel();
        let fallback = pending.clone();
        let chunks = ChunkStream {
            source: Some(source.chunks),
            sink,
            finalizer: Some(Finalizer { pending, tx }),
            request_id: source.request_id,
            metadata_latency: source.metadata_latency,
            ttfb: None,
            bytes: 0,
            rows: 0,
            chunks: 0,
        };

        Self {
            chunks,
            outcome: StreamOutcome { rx, fallback },
        }
    }

    /// A query that failed before any chunk could be requested.
    pub fn failed(pending: PendingQuery, completion: Completion) -> Self {
        let (tx, rx) = oneshot::channel();
        let fallback = pending.clone();
        let _ = tx.send(pending.finish(completion));

        Self {
            chunks: ChunkStream::closed(),
            outcome: StreamOutcome { rx, fallback },
        }
    }

    /// Drain every chunk, then resolve the final result.
    pub async fn collect(self) -> QueryResult {
        let StreamQuery { mut chunks, outcome } = self;
        while chunks.next().await.is_some() {}
        drop(chunks);
        outcome.resolve().await
    }
}
