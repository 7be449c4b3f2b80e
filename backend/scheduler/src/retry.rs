//! Retry engine: bounded attempts with fixed or exponential delay between them.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docpipe_config::RetryConfig;
use docpipe_core::PipelineError;

/// Retry policy applied to each step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, counting the first call.
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds.
    pub first_retry_interval_ms: u64,
    /// Multiplier for each subsequent wait. 1.0 keeps the delay fixed.
    pub backoff_coefficient: f64,
    /// Maximum delay cap in milliseconds.
    pub max_retry_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            first_retry_interval_ms: config.first_retry_interval_ms,
            backoff_coefficient: config.backoff_coefficient,
            max_retry_interval_ms: config.max_retry_interval_ms,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries `max_attempts` times with a fixed delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_attempts: max_attempts.max(1),
            first_retry_interval_ms: delay_ms,
            backoff_coefficient: 1.0,
            max_retry_interval_ms: delay_ms,
        }
    }

    /// Delay after failed attempt `attempt_number` (1-indexed).
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.first_retry_interval_ms as f64
            * self.backoff_coefficient.powi((attempt_number - 1) as i32);
        let cap = self.max_retry_interval_ms.max(self.first_retry_interval_ms) as f64;
        Duration::from_millis(delay_ms.min(cap) as u64)
    }

    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}

/// Retry state for tracking an in-progress step's retry lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<String>,
    pub exhausted: bool,
}

impl RetryState {
    /// Record a failure; returns the delay before the next attempt, or `None`
    /// when the error is permanent or the policy is used up.
    pub fn record_failure(
        &mut self,
        policy: &RetryPolicy,
        label: &str,
        error: &PipelineError,
    ) -> Option<Duration> {
        self.attempt += 1;
        self.last_error = Some(error.to_string());

        if !error.is_retryable() {
            self.exhausted = true;
            warn!(step = %label, attempt = self.attempt, error = %error, "Permanent failure, not retrying");
            return None;
        }

        if policy.should_retry(self.attempt) {
            let delay = policy.delay_for(self.attempt);
            warn!(
                step = %label,
                attempt = self.attempt,
                max = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Step failed, will retry"
            );
            Some(delay)
        } else {
            self.exhausted = true;
            warn!(step = %label, attempt = self.attempt, error = %error, "Step retry policy exhausted");
            None
        }
    }
}

/// The error from the final attempt and how many attempts were made.
#[derive(Debug)]
pub struct RetryExhausted {
    pub error: PipelineError,
    pub attempts: u32,
}

/// Run `op` until it succeeds or `policy` is exhausted.
///
/// Returns the value and the number of attempts it took. Non-retryable
/// errors stop immediately.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut state = RetryState::default();
    loop {
        debug!(step = %label, attempt = state.attempt + 1, "Attempting step");
        match op().await {
            Ok(value) => return Ok((value, state.attempt + 1)),
            Err(error) => match state.record_failure(policy, label, &error) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(RetryExhausted {
                        error,
                        attempts: state.attempt,
                    })
                }
            },
        }
    }
}
