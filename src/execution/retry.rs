//! Bounded retries around blocking collaborator calls

use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::warn;

use super::types::ExecutionError;
use crate::config::LiveConfig;

/// Retry configuration
///
/// Collaborator calls are blocking. A transient failure that returns after
/// `timeout` is reported as `ExecutionError::Timeout`. A late success is kept:
/// the venue has already acted on it, so re-sending would duplicate orders.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    /// Base delay; attempt `n` waits `n * backoff`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(live: &LiveConfig) -> Self {
        Self::default()
            .with_max_retries(live.max_retries)
            .with_timeout(Duration::from_secs(live.timeout_secs))
            .with_backoff(Duration::from_millis(live.retry_backoff_ms))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op`, retrying transient failures up to `max_retries` times
    pub fn call<T, F>(&self, name: &str, mut op: F) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Result<T, ExecutionError>,
    {
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            let result = match op() {
                Ok(value) => {
                    if started.elapsed() > self.timeout {
                        warn!("{} succeeded after {:?} (timeout {:?})", name, started.elapsed(), self.timeout);
                    }
                    Ok(value)
                }
                Err(e) if e.is_transient() && started.elapsed() > self.timeout => {
                    Err(ExecutionError::Timeout(self.timeout))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{}",
                        name, e, attempt, self.max_retries
                    );
                    sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
