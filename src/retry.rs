use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{GatewayError, IndexerError, IndexerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Bounded retry applied to remote reads and persistence writes alike.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    /// Upper bound on the random extra delay added to each wait.
    pub jitter: Duration,
    /// Per-attempt timeout. `None` lets the attempt run until it resolves.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff: Backoff::Exponential,
            jitter: Duration::from_millis(250),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings, timeout_secs: u64) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff: if settings.exponential {
                Backoff::Exponential
            } else {
                Backoff::Fixed
            },
            jitter: Duration::from_millis(settings.jitter_ms),
            timeout: Some(Duration::from_secs(timeout_secs)),
        }
    }

    /// The two-attempt policy used around snapshot reads.
    pub fn snapshot(timeout: Duration) -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
            jitter: Duration::ZERO,
            timeout: Some(timeout),
        }
    }

    /// Delay before attempt `attempt + 1`, jitter excluded.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(extra)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> IndexerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IndexerResult<T>>,
    {
        self.run_if(operation, IndexerError::is_retryable, f).await
    }

    /// Runs `f` until it succeeds, fails with an error `retryable` rejects,
    /// or the attempt budget is spent.
    pub async fn run_if<T, F, Fut, P>(&self, operation: &str, retryable: P, mut f: F) -> IndexerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IndexerResult<T>>,
        P: Fn(&IndexerError) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(IndexerError::Gateway(GatewayError::Timeout(limit.as_secs()))),
                },
                None => f().await,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !retryable(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(IndexerError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        timed_out: e.is_timeout(),
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    let wait = self.jittered_delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation, attempt, self.max_attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
