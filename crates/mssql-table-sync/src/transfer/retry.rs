//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Retry policy for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,

    /// Exponential base of the delay.
    pub backoff_base: u32,

    /// Length of one backoff time unit.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            backoff_unit: config.backoff_unit(),
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (counted from 1): `unit * base^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_base.saturating_pow(retry);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 1-based attempt number and must
    /// redo the whole unit from scratch.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_when(label, SyncError::is_retryable, op).await
    }

    /// Like [`run`](Self::run), with the caller deciding which errors earn
    /// another attempt.
    pub async fn run_when<T, F, Fut, P>(&self, label: &str, retryable: P, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&SyncError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt <= self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{}: attempt {}/{} failed, retrying in {:?}: {}",
                        label,
                        attempt,
                        self.max_attempts(),
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
