use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// How a single request talks to its backend.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryPattern {
    /// Request, then wait for the full response.
    Sync,
    /// Request, then receive an ordered sequence of chunks of unknown count.
    Stream,
    /// Request triggers production elsewhere; poll until a location is
    /// published, then fetch from it.
    Offload,
}

impl QueryPattern {
    pub const ALL: [QueryPattern; 3] = [QueryPattern::Sync, QueryPattern::Stream, QueryPattern::Offload];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPattern::Sync => "sync",
            QueryPattern::Stream => "stream",
            QueryPattern::Offload => "offload",
        }
    }
}

impl fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(QueryPattern::Sync),
            "stream" => Ok(QueryPattern::Stream),
            "offload" => Ok(QueryPattern::Offload),
            other => Err(format!("unknown query pattern: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
            QueryStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-reported timestamps, passed through untouched.
pub type ServerTimestamps = BTreeMap<String, serde_json::Value>;

/// The unit of observation: one attempt against one backend.
///
/// A `QueryResult` can only be produced by [`PendingQuery::finish`], so every
/// value carries a terminal status and a throughput derived from its final
/// `bytes` and `total_time`. It is a plain value: once built, it is moved
/// between tasks, never shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub request_id: String,
    pub backend: String,
    pub connector_id: String,
    pub dataset: String,
    pub pattern: QueryPattern,
    pub status: QueryStatus,
    pub rows: u64,
    pub bytes: u64,
    /// Wall-clock dispatch time.
    pub t0_sent: DateTime<Utc>,
    /// Dispatch to the first observable unit of response data.
    pub ttfb: Duration,
    /// Dispatch to completion.
    pub total_time: Duration,
    pub metadata_latency: Duration,
    pub transfer_latency: Duration,
    pub throughput_bytes_per_sec: f64,
    pub error: Option<String>,
    #[serde(default)]
    pub server_timestamps: ServerTimestamps,
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn total_time_ms(&self) -> f64 {
        self.total_time.as_secs_f64() * 1000.0
    }

    pub fn ttfb_ms(&self) -> f64 {
        self.ttfb.as_secs_f64() * 1000.0
    }
}

/// `bytes / total_time`, or zero when either side is zero.
pub fn throughput(bytes: u64, total_time: Duration) -> f64 {
    let secs = total_time.as_secs_f64();
    if secs > 0.0 && bytes > 0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

/// A dispatched request that has not reached a terminal status yet.
///
/// Created at dispatch time; consumed exactly once by [`PendingQuery::finish`].
#[derive(Debug, Clone)]
pub struct PendingQuery {
    request_id: String,
    backend: String,
    connector_id: String,
    dataset: String,
    pattern: QueryPattern,
    t0_sent: DateTime<Utc>,
    started: Instant,
}

impl PendingQuery {
    pub fn start(
        backend: impl Into<String>,
        connector_id: impl Into<String>,
        dataset: impl Into<String>,
        pattern: QueryPattern,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            backend: backend.into(),
            connector_id: connector_id.into(),
            dataset: dataset.into(),
            pattern,
            t0_sent: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn pattern(&self) -> QueryPattern {
        self.pattern
    }

    /// Time since dispatch.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move into a terminal status.
    ///
    /// `total_time` defaults to the time elapsed since dispatch. Throughput is
    /// derived last, from the final `bytes` and `total_time`.
    pub fn finish(self, completion: Completion) -> QueryResult {
        let total_time = completion.total_time.unwrap_or_else(|| self.started.elapsed());
        let error = match completion.status {
            QueryStatus::Success => None,
            _ => Some(
                completion
                    .error
                    .unwrap_or_else(|| format!("query ended with status {}", completion.status)),
            ),
        };

        QueryResult {
            request_id: completion.request_id.unwrap_or(self.request_id),
            backend: self.backend,
            connector_id: self.connector_id,
            dataset: self.dataset,
            pattern: self.pattern,
            status: completion.status,
            rows: completion.rows,
            bytes: completion.bytes,
            t0_sent: self.t0_sent,
            ttfb: completion.ttfb,
            total_time,
            metadata_latency: completion.metadata_latency,
            transfer_latency: completion.transfer_latency,
            throughput_bytes_per_sec: throughput(completion.bytes, total_time),
            error,
            server_timestamps: completion.server_timestamps,
        }
    }
}

/// Everything an adapter measured about one request.
#[derive(Debug, Clone)]
pub struct Completion {
    status: QueryStatus,
    request_id: Option<String>,
    rows: u64,
    bytes: u64,
    ttfb: Duration,
    total_time: Option<Duration>,
    metadata_latency: Duration,
    transfer_latency: Duration,
    error: Option<String>,
    server_timestamps: ServerTimestamps,
}

impl Completion {
    fn with_status(status: QueryStatus, error: Option<String>) -> Self {
        Self {
            status,
            request_id: None,
            rows: 0,
            bytes: 0,
            ttfb: Duration::ZERO,
            total_time: None,
            metadata_latency: Duration::ZERO,
            transfer_latency: Duration::ZERO,
            error,
            server_timestamps: ServerTimestamps::new(),
        }
    }

    pub fn success() -> Self {
        Self::with_status(QueryStatus::Success, None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(QueryStatus::Error, Some(message.into()))
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_status(QueryStatus::Timeout, Some(message.into()))
    }

    /// Request id assigned by the backend, replacing the locally generated one.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn rows(mut self, rows: u64) -> Self {
        self.rows = rows;
        self
    }

    pub fn bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn ttfb(mut self, ttfb: Duration) -> Self {
        self.ttfb = ttfb;
        self
    }

    /// Override the elapsed time measured by [`PendingQuery::finish`].
    pub fn total_time(mut self, total_time: Duration) -> Self {
        self.total_time = Some(total_time);
        self
    }

    pub fn metadata_latency(mut self, latency: Duration) -> Self {
        self.metadata_latency = latency;
        self
    }

    pub fn transfer_latency(mut self, latency: Duration) -> Self {
        self.transfer_latency = latency;
        self
    }

    pub fn server_timestamps(mut self, timestamps: ServerTimestamps) -> Self {
        self.server_timestamps = timestamps;
        self
    }
}
