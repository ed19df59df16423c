//! Bounded retry with exponential backoff
//!
//! Version conflicts are the one retryable failure in this subsystem.
//! Instead of sprinkling retry loops through call sites, the engine and
//! the index maintainer both run their read-compute-write cycles through
//! this single combinator. Any other error kind aborts immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ReputationError, Result};

/// Retry policy for version-conflicted writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, completed_attempts: u32) -> Duration {
        Duration::from_millis(self.initial_backoff_ms << (completed_attempts - 1).min(16))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Only [`ReputationError::VersionConflict`] is
/// retried; exhaustion surfaces as [`ReputationError::RetriesExhausted`]
/// carrying `context` (collection/key) so the failed write is traceable.
pub async fn with_version_retry<T, F, Fut>(
    policy: &RetryPolicy,
    context: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_version_conflict() => {
                if attempt >= policy.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        "Version conflict retries exhausted"
                    );
                    return Err(ReputationError::RetriesExhausted {
                        context: context.to_string(),
                        attempts: attempt,
                    });
                }
                let backoff = policy.backoff(attempt);
                warn!(
                    context = %context,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Version conflict, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
