//! Execute-with-retry for block operations
//!
//! Wraps a whole per-record operation: on a retryable failure the operation
//! is invoked again from the start after an exponential backoff. Anything
//! inside the operation (connecting, metadata lookups, the write itself) is
//! therefore repeated and must be safe to repeat. Deletes are: a second
//! delete of a document that is already gone reports zero deleted instead of
//! failing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;
use validator::Validate;

use crate::error::{BlockError, BlockResult};

/// Retry behaviour for transient failures
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 100))]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier applied per attempt (2.0 doubles the delay each retry)
    #[serde(default = "default_backoff_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 to 1.0) spreading delays around the base value
    #[serde(default = "default_jitter_factor")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Same delay before every retry
    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_retries,
            initial_backoff_ms: ms,
            max_backoff_ms: ms,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_backoff_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_backoff_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Jitter is clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delays to sleep before each retry, one per allowed retry
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            retry: 0,
        }
    }
}

/// Iterator over retry delays
///
/// Yields `max_retries` delays, growing by `backoff_multiplier` from
/// `initial_backoff_ms` and never exceeding `max_backoff_ms` before jitter.
#[derive(Debug, Clone)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    retry: u32,
}

impl Backoff<'_> {
    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retry
    }
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.config.max_retries {
            return None;
        }
        self.retry += 1;

        let growth = self.config.backoff_multiplier.powi(self.retry.min(31) as i32 - 1);
        let delay_ms = (self.config.initial_backoff_ms as f64 * growth)
            .min(self.config.max_backoff_ms as f64);

        // spread by a fixed low-discrepancy sequence so runs are reproducible
        let phase = (self.retry as f64 * 0.618_033_988_749_895).fract() * 2.0 - 1.0;
        let jittered = delay_ms * (1.0 + self.config.jitter_factor * phase);

        Some(Duration::from_millis(jittered.max(0.0) as u64))
    }
}

/// Run `operation`, re-invoking it from scratch after retryable failures
///
/// Non-retryable errors are returned at once. When the backoff runs out the
/// last error is returned.
pub async fn execute_with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> BlockResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BlockError>,
{
    let started = Instant::now();
    let mut backoff = config.backoff();

    loop {
        let error: BlockError = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e.into(),
        };

        let delay = match backoff.next() {
            Some(delay) if error.is_retryable() => delay,
            _ => {
                if backoff.retries() > 0 {
                    warn!(
                        error = %error,
                        retries = backoff.retries(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Giving up after retries"
                    );
                }
                return Err(error);
            }
        };

        warn!(
            error = %error,
            retry = backoff.retries(),
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
