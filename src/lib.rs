//! Unibench: a benchmarking harness for heterogeneous data backends.
//!
//! Backends differ in wire protocol and in how they deliver a dataset: as a
//! single response, as a stream of chunks, or by publishing it to storage and
//! letting the client poll. Unibench drives all of them through one adapter
//! contract and normalizes every request into the same [`QueryResult`], so
//! latency, time to first byte and throughput are comparable across backends.
//!
//! # Architecture
//!
//! - [`BackendAdapter`]: one implementation per backend protocol. Adapters
//!   declare the [`QueryPattern`]s they support and never fail a query with
//!   `Err`; failures are results too.
//! - [`PendingQuery`] / [`Completion`]: the lifecycle of a single request.
//!   A result is created pending and finished exactly once.
//! - [`StreamQuery`]: the two-phase streaming API. Drain the chunks, then
//!   resolve the final result.
//! - [`LoadTester`]: runs many requests against one adapter under a
//!   concurrency cap.
//! - [`LoadTestMetrics`]: the pure reduction of a run (counts, latency
//!   percentiles, throughput).
//! - [`MetricsCollector`]: buffers raw results and flushes them to the
//!   durable CSV log.
//! - [`Reporter`]: consumes metrics and sends them somewhere (stdout, a JSON
//!   file).
//!
//! # Where to start
//!
//! Build an adapter from an [`AppConfig`], then either call it directly or
//! hand it to a [`LoadTester`].

/// Backend adapter contract and implementations
pub mod adapter;
/// In-memory result buffer
pub mod aggregate;
/// Application and run configuration
pub mod config;
pub mod error;
/// Concurrent load test execution
pub mod executor;
/// Per-request results and their lifecycle
pub mod metric;
pub mod metrics_log;
/// Reductions and reporters
pub mod report;
pub mod telemetry;

pub use adapter::{BackendAdapter, ConnectorInfo, QueryRequest, RestSseAdapter, StreamQuery};
pub use aggregate::{CollectorSummary, MetricsCollector};
pub use config::{AppConfig, BackendConfig, LoadTestConfig};
pub use error::{ConfigError, Error, Result, TransportError};
pub use executor::LoadTester;
pub use metric::{Completion, PendingQuery, QueryPattern, QueryResult, QueryStatus};
pub use metrics_log::MetricsLog;
pub use report::{ConsoleReporter, JsonFileReporter, LoadTestMetrics, Reporter, SummaryExport, percentile};
