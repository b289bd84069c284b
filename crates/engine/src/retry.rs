use std::future::Future;
use std::time::Duration;

use perp_keeper_core::{GatewayError, GatewayResult, RetryConfig};
use tracing::{debug, warn};

/// Fixed-delay retry around a single exchange call.
///
/// Each attempt is bounded by `attempt_timeout`; errors that cannot succeed
/// on a repeat (`Permission`, `UnknownOrder`, `InvalidRequest`) end the loop
/// at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::orders()
    }
}

impl RetryPolicy {
    /// Order submission: 3 attempts, 3 s apart.
    #[must_use]
    pub const fn orders() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
            attempt_timeout: Duration::from_secs(15),
        }
    }

    /// Reads: 3 attempts, 2 s apart.
    #[must_use]
    pub const fn reads() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub const fn single() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            attempt_timeout: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub fn orders_from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.order_attempts.max(1),
            delay: Duration::from_millis(config.order_delay_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs.max(1)),
        }
    }

    #[must_use]
    pub fn reads_from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.read_attempts.max(1),
            delay: Duration::from_millis(config.read_delay_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs.max(1)),
        }
    }

    #[must_use]
    pub const fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Runs `op` until it succeeds, fails terminally or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error observed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => GatewayError::Timeout(format!(
                    "{label} exceeded {}ms",
                    self.attempt_timeout.as_millis()
                )),
            };

            if !error.is_retryable() {
                debug!(label, attempt, error = %error, "not retrying");
                return Err(error);
            }
            if attempt >= attempts {
                warn!(label, attempts, error = %error, "giving up after retries");
                return Err(error);
            }

            warn!(label, attempt, attempts, error = %error, "attempt failed, retrying");
            attempt += 1;
            tokio::time::sleep(self.delay).await;
        }
    }
}
