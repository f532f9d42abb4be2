//! Resource polling at a fixed interval with cancellation support.
//!
//! Image creation and copy are tracked by re-describing the image every
//! poll interval. A failing describe call is treated as transient and simply
//! retried on the next tick; only an explicit failed state or cancellation
//! ends the wait early.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for resource polling.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay between checks
    pub poll_interval: Duration,
}

/// Outcome of a single check
#[derive(Debug)]
pub enum PollStatus<T> {
    /// The resource reached the wanted state
    Ready(T),
    /// Not there yet, check again after the poll interval
    NotReady,
    /// The resource reached a state it cannot recover from
    Failed(String),
}

/// Reasons a wait ends without the resource becoming ready
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Wait for {resource} cancelled")]
    Cancelled { resource: String },

    #[error("{resource} failed: {reason}")]
    Failed { resource: String, reason: String },
}

/// Poll a resource until it is ready.
///
/// # Arguments
/// * `config` - Wait configuration
/// * `cancel` - Optional cancellation token, observed between checks
/// * `check` - Async function reporting the resource's status; an `Err` is
///   logged and retried on the next tick
/// * `resource_name` - Name for logging
pub async fn wait_for_resource<F, Fut, T>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<T, WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<PollStatus<T>>>,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(WaitError::Cancelled {
                resource: resource_name.to_string(),
            });
        }

        match check().await {
            Ok(PollStatus::Ready(value)) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(value);
            }
            Ok(PollStatus::NotReady) => {
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = config.poll_interval.as_millis(),
                    "Resource not ready, polling again"
                );
            }
            Ok(PollStatus::Failed(reason)) => {
                warn!(resource = %resource_name, reason = %reason, "Resource failed");
                return Err(WaitError::Failed {
                    resource: resource_name.to_string(),
                    reason,
                });
            }
            Err(e) => {
                warn!(
                    resource = %resource_name,
                    attempt = attempts,
                    error = %e,
                    "Resource check failed, retrying on next poll"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = async {
                if let Some(token) = cancel {
                    token.cancelled().await
                } else {
                    std::future::pending::<()>().await
                }
            } => {
                return Err(WaitError::Cancelled {
                    resource: resource_name.to_string(),
                });
            }
        }
    }
}
