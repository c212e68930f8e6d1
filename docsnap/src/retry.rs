use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorClass, ExtractionError, PipelineError};
use crate::telemetry::{RetryEvent, TelemetrySink};

/// Floor for the first backoff delay; a zero delay would never grow.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Raised to [`MIN_RETRY_DELAY`] when smaller.
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: initial_delay.max(MIN_RETRY_DELAY),
        }
    }

    /// Delay before retry number `retry` (counting from 0):
    /// `initial_delay * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay
            .max(MIN_RETRY_DELAY)
            .saturating_mul(2u32.saturating_pow(retry))
    }

    fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Gave up after {attempts} attempts: {error}")]
    Exhausted {
        error: ExtractionError,
        attempts: u32,
    },

    #[error("Non-retryable failure on attempt {attempts}: {error}")]
    Terminal {
        error: ExtractionError,
        attempts: u32,
    },

    #[error("Retry loop cancelled")]
    Cancelled,
}

impl From<RetryError> for PipelineError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Exhausted { error, attempts } | RetryError::Terminal { error, attempts } => {
                PipelineError::Extraction { error, attempts }
            }
            RetryError::Cancelled => PipelineError::Cancelled,
        }
    }
}

struct RetryState {
    attempt: u32,
    next_delay: Duration,
    last_error_class: Option<ErrorClass>,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            next_delay: policy.delay_for(0),
            last_error_class: None,
        }
    }

    /// Record a failed attempt. Returns the delay to wait before the next
    /// attempt, or `None` when the loop has to stop.
    fn fail(&mut self, error: &ExtractionError, policy: &RetryPolicy) -> Option<Duration> {
        let class = error.class();
        self.last_error_class = Some(class);
        if class == ErrorClass::Terminal || self.attempt >= policy.attempt_limit() {
            return None;
        }
        let delay = self.next_delay;
        self.next_delay = policy.delay_for(self.attempt);
        Some(delay)
    }
}

/// Runs extraction calls under a [`RetryPolicy`], reporting every retry to
/// the telemetry sink.
#[derive(Clone)]
pub struct RetryCoordinator {
    telemetry: Arc<dyn TelemetrySink>,
}

impl RetryCoordinator {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { telemetry }
    }

    /// Invoke `call` until it succeeds, fails terminally, runs out of
    /// attempts or `cancel` fires. Cancellation interrupts both the backoff
    /// sleep and an in-flight call.
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExtractionError>>,
    {
        let mut state = RetryState::new(policy);

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            state.attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = call() => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    if state.attempt > 1 {
                        debug!(attempts = state.attempt, "Extraction succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let Some(delay) = state.fail(&error, policy) else {
                let attempts = state.attempt;
                return Err(match state.last_error_class {
                    Some(ErrorClass::Retryable) => {
                        warn!(attempts, %error, "Extraction retries exhausted");
                        RetryError::Exhausted { error, attempts }
                    }
                    _ => {
                        debug!(attempts, %error, "Extraction failed with terminal error");
                        RetryError::Terminal { error, attempts }
                    }
                });
            };

            warn!(
                attempt = state.attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Extraction failed, retrying"
            );
            self.telemetry.retry(RetryEvent {
                attempt: state.attempt,
                delay,
                error,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
