//! Status polling for the offload pattern.
use std::time::Duration;

use crate::{error::TransportError, metric::ServerTimestamps};

/// How often and how long to poll for a published location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for OffloadPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 120,
        }
    }
}

/// What one status check reported.
#[derive(Debug, Clone, PartialEq)]
pub enum OffloadStatus {
    Pending,
    Completed {
        location: String,
        server_timestamps: ServerTimestamps,
    },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Published {
        location: String,
        server_timestamps: ServerTimestamps,
        attempts: u32,
    },
    /// The backend reported an error; the message is passed through verbatim.
    Failed(String),
    /// Every attempt came back pending.
    Exhausted { attempts: u32 },
}

/// Call `check` every `poll_interval` until it reports a terminal status or
/// `max_attempts` checks have been made.
///
/// `check` receives the 1-based attempt number. A transport error aborts
/// polling and is returned as is.
pub async fn poll_until_published<F, Fut>(
    policy: OffloadPolicy,
    mut check: F,
) -> Result<PollOutcome, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<OffloadStatus, TransportError>>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await? {
            OffloadStatus::Completed {
                location,
                server_timestamps,
            } => {
                tracing::debug!("Offload published after {attempt} polls");
                return Ok(PollOutcome::Published {
                    location,
                    server_timestamps,
                    attempts: attempt,
                });
            }
            OffloadStatus::Failed(message) => return Ok(PollOutcome::Failed(message)),
            OffloadStatus::Pending => tokio::time::sleep(policy.poll_interval).await,
        }
    }

    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    })
}
