use std::time::Duration;

use thiserror::Error;

use crate::metric::{Completion, QueryPattern};

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a command before or after a run.
///
/// Failures of individual queries never show up here: adapters fold them
/// into a [`crate::QueryResult`] with an `error` or `timeout` status.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("failed to export summary: {0}")]
    Export(#[from] ExportError),
}

/// Invalid setup, always raised before any request is dispatched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("pattern {pattern} not supported by {backend}. Supported: {supported:?}")]
    UnsupportedPattern {
        pattern: QueryPattern,
        backend: String,
        supported: Vec<QueryPattern>,
    },

    #[error("backend '{name}' not found. Available: {available:?}")]
    UnknownBackend {
        name: String,
        available: Vec<String>,
    },

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failure talking to a backend. Never crosses the adapter boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("failed to write output: {0}")]
    Sink(#[from] std::io::Error),

    #[error("{backend} does not support the {pattern} pattern")]
    Unsupported {
        backend: String,
        pattern: QueryPattern,
    },

    #[error("Timeout after {0:?}")]
    TimedOut(Duration),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout(),
            TransportError::TimedOut(_) => true,
            _ => false,
        }
    }

    /// Name the limit that fired when this is a timeout.
    pub fn timed_out_after(self, limit: Duration) -> Self {
        if self.is_timeout() {
            TransportError::TimedOut(limit)
        } else {
            self
        }
    }
}

impl From<TransportError> for Completion {
    fn from(error: TransportError) -> Self {
        if error.is_timeout() {
            Completion::timeout(error.to_string())
        } else {
            Completion::error(error.to_string())
        }
    }
}

/// Failure appending to the durable metrics log.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to open metrics log: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write metrics log: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
