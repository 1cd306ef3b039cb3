use rand::Rng;
use shipwise_core::carrier::AdapterResult;
use shipwise_core::{CarrierFailure, CoreError, CoreResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::sandbox::SandboxError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retries
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Only outages are retried; a carrier that said no will say no again.
    pub fn should_retry(&self, attempt: u32, error: &CoreError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        matches!(
            error,
            CoreError::CarrierError {
                kind: CarrierFailure::Timeout | CarrierFailure::Transport,
                ..
            }
        )
    }

    /// Backoff before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let secs = (self.initial_backoff.as_secs_f64() * 2_f64.powi(exp)).min(self.max_backoff.as_secs_f64());

        if self.jitter {
            // 75% to 100% of the nominal delay
            let factor = rand::thread_rng().gen_range(0.75..=1.0);
            Duration::from_secs_f64(secs * factor)
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Bounds for every outbound carrier call
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl CallPolicy {
    /// Run `call` under the timeout, retrying transient failures.
    ///
    /// Adapter `Err`s become `Transport` failures, or `Rejected` for a carrier
    /// refusal, and elapsed timeouts become `Timeout` failures, all tagged
    /// with `carrier`.
    pub async fn run<F, Fut, T>(&self, carrier: &str, operation: &str, mut call: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => CoreError::CarrierError {
                    carrier: carrier.to_string(),
                    kind: match e.downcast_ref::<SandboxError>() {
                        Some(SandboxError::Refused { .. }) => CarrierFailure::Rejected,
                        _ => CarrierFailure::Transport,
                    },
                    message: e.to_string(),
                },
                Err(_) => CoreError::CarrierError {
                    carrier: carrier.to_string(),
                    kind: CarrierFailure::Timeout,
                    message: format!("{} got no answer within {} ms", operation, self.timeout.as_millis()),
                },
            };

            if !self.retry.should_retry(attempt, &error) {
                return Err(error);
            }
            let delay = self.retry.delay(attempt);
            warn!(carrier, operation, attempt, ?delay, "Carrier call failed, retrying: {}", error);
            tokio::time::sleep(delay).await;
        }
    }
}
