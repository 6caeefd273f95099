//! Bounded retry for notifier sends

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::notifier::NotifierError;

/// Retry budget for one notifier send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    /// Multiplied by the square of the attempt number between attempts
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_base: Duration) -> Self {
        Self {
            attempts,
            backoff_base,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. The last error is returned. Cancellation
    /// drops the attempt in flight and ends with [`NotifierError::Cancelled`].
    pub async fn run<F, Fut>(
        &self,
        notifier_id: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<(), NotifierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), NotifierError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(NotifierError::Cancelled),
                outcome = op() => outcome,
            };
            match outcome {
                Ok(()) => {
                    debug!(notifier_id, attempt, "Report email sent");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        notifier_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Report email send failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(NotifierError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
