/// Exponential backoff for calls to external collaborators.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::core::continuity::CollaboratorError;

/// Errors that know whether repeating the call could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided wait before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for CollaboratorError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::RateLimited { .. } | CollaboratorError::Unavailable(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CollaboratorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Add up to one base delay of random jitter to computed waits.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based).
    ///
    /// A server `Retry-After` is honoured as given; otherwise the wait is
    /// `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait;
        }
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor);
        if self.jitter && !self.base_delay.is_zero() {
            let max = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
            let extra = rand::thread_rng().gen_range(0..=max);
            delay.saturating_add(Duration::from_millis(extra))
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, fails permanently or retries run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let wait = self.delay_for(attempt, e.retry_after());
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "Retrying collaborator call"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
