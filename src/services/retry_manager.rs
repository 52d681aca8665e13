//! Retry manager for transient operations.
//!
//! The core never retries on its own; callers that want retry wrap the
//! call through this manager. Only VCS-shaped failures are treated as
//! transient.

use std::future::Future;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use tracing::warn;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Retry policy knobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_elapsed_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_elapsed_secs: 60,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

/// Wraps fallible async operations in an exponential-backoff retry loop.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.policy.initial_backoff_ms),
            max_interval: Duration::from_millis(self.policy.max_backoff_ms),
            max_elapsed_time: Some(Duration::from_secs(self.policy.max_elapsed_secs)),
            ..ExponentialBackoff::default()
        }
    }

    /// Run `op`, retrying transient VCS failures with exponential
    /// backoff. All other errors are returned immediately.
    pub async fn run_vcs<T, F, Fut>(&self, label: &str, mut op: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        retry(self.backoff(), || {
            let fut = op();
            async {
                fut.await.map_err(|e| {
                    if is_transient(&e) {
                        warn!(operation = label, error = %e, "Transient failure, will retry");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}

/// Push and other VCS failures are transient (remote hiccups); input,
/// state, and agent errors are not.
fn is_transient(error: &OrchestratorError) -> bool {
    matches!(
        error,
        OrchestratorError::Vcs(_) | OrchestratorError::PushFailed { .. }
    )
}
