use std::future::Future;
use std::time::Duration;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff configuration.
///
/// The delay before retry `n` (0-indexed) is `unit * backoff_base^n`, so the
/// defaults give 1s, 5s, 25s, ...
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base: u32,
    pub unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 5,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// A config that retries without sleeping.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: 5,
            unit: Duration::ZERO,
        }
    }

    /// Compute the delay for a given retry attempt (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_base.checked_pow(retry).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }

    fn total_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Retry an async operation with exponential backoff.
///
/// - `config`: retry configuration
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error if attempts are exhausted
/// or the classifier returns `Abort`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => match backoff_after(config, &classifier, attempt, &e) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(e),
            },
        }
        attempt += 1;
    }
}

/// Blocking counterpart of [`retry_with_backoff`] for work that already runs
/// on a blocking thread (metadata decoding). Sleeps the calling thread.
pub fn retry_blocking<F, T, E, C>(config: &RetryConfig, classifier: C, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(val) => return Ok(val),
            Err(e) => match backoff_after(config, &classifier, attempt, &e) {
                Some(delay) => std::thread::sleep(delay),
                None => return Err(e),
            },
        }
        attempt += 1;
    }
}

/// Decide what follows failed attempt `attempt` (0-indexed): the delay
/// before trying again, or `None` to give up and return the error.
fn backoff_after<E, C>(config: &RetryConfig, classifier: &C, attempt: u32, error: &E) -> Option<Duration>
where
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.total_attempts();
    if classifier(error) == RetryAction::Abort || attempt + 1 >= total_attempts {
        return None;
    }
    let delay = config.delay_for_retry(attempt);
    tracing::warn!(
        "Attempt {}/{} failed, retrying in {:?}: {}",
        attempt + 1,
        total_attempts,
        delay,
        error
    );
    Some(delay)
}
