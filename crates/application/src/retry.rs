use std::time::Duration;

use domain::common::error::DomainError;

/// Retry policy for idempotent external steps (rule retraction, daemon
/// resync). Never used for `apply` or block append, which are not safe to
/// repeat blindly.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: usize,
    /// Delay before each retry; the last entry repeats.
    pub backoff_schedule: Vec<Duration>,
    /// Bound on a single attempt.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_schedule: vec![Duration::from_millis(250), Duration::from_secs(1)],
            timeout: Duration::from_secs(15),
        }
    }
}

impl RetryConfig {
    /// Single attempt, bounded by `timeout`.
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            backoff_schedule: Vec::new(),
            timeout,
        }
    }

    fn backoff_for(&self, attempt: usize) -> Duration {
        self.backoff_schedule
            .get(attempt)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or(Duration::from_millis(250))
    }
}

/// Run `f` until it succeeds, fails with a non-retriable error, or the
/// retry budget is spent.
///
/// An attempt exceeding `config.timeout` counts as `DomainError::Timeout`,
/// which is retriable. Any other error is returned at once.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    what: &str,
    mut f: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DomainError>>,
{
    let mut attempt = 0;
    loop {
        let err = match tokio::time::timeout(config.timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_elapsed) => DomainError::Timeout(format!(
                "{what} exceeded {}s",
                config.timeout.as_secs_f32()
            )),
        };

        if !err.is_retriable() || attempt >= config.max_retries {
            return Err(err);
        }

        let delay = config.backoff_for(attempt);
        tracing::debug!(step = what, attempt, error = %err, ?delay, "retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
