//! Bounded retry around a whole completion attempt.
//!
//! Every failure is retried: an attempt opens a fresh session, so even
//! credential errors can succeed once the evicted credential is refreshed.
//! After `max_retries + 1` attempts the last error is returned unchanged.

use kimi_bridge_config::RetryConfig;
use kimi_bridge_types::traits::Result;
use std::{future::Future, time::Duration};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.delay(),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or the retry budget is spent, sleeping
    /// `delay` before each retry.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    tracing::error!(label, attempts = attempt + 1, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}
