//! Timeout and retry around provider calls.

use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Per-call timeout plus a fixed retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 1,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries,
            ..Self::default()
        }
    }

    /// Run `op` under the timeout, retrying transient failures.
    ///
    /// Invalid input, configuration and not-found errors are returned
    /// immediately. When every attempt times out the result is
    /// [`AppError::ProviderTimeout`].
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.retries + 1;
        let mut last_err = AppError::ProviderTimeout(what.to_string());

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !is_transient(&err) => return Err(err),
                Ok(Err(err)) => {
                    warn!(what, attempt, error = %err, "Provider call failed");
                    last_err = err;
                }
                Err(_) => {
                    warn!(what, attempt, timeout_ms = self.timeout.as_millis() as u64, "Provider call timed out");
                    last_err = AppError::ProviderTimeout(format!(
                        "{} exceeded {:?} after {} attempt(s)",
                        what, self.timeout, attempt
                    ));
                }
            }

            if attempt < attempts && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff).await;
            }
        }

        Err(last_err)
    }
}

fn is_transient(err: &AppError) -> bool {
    matches!(
        err,
        AppError::ProviderTimeout(_)
            | AppError::Embedding(_)
            | AppError::LLM(_)
            | AppError::VectorStore(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            retries,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = fast(1)
            .run("embed", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::Embedding("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_provider_timeout() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(1)
            .run("embed", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::ProviderTimeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(3)
            .run("embed", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::InvalidInput("bad".into()))
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
