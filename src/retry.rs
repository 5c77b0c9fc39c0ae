use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng as _;

use crate::error::FetchError;

/// Attempt budget, backoff window and retry classifier for one kind of
/// operation. Each level of the pipeline gets its own instance.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: RangeInclusive<Duration>,
    classifier: fn(&FetchError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: RangeInclusive<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            classifier: FetchError::is_retryable,
        }
    }

    pub fn with_classifier(mut self, classifier: fn(&FetchError) -> bool) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Uniform jitter inside the backoff window.
    pub fn delay(&self) -> Duration {
        let (low, high) = (*self.backoff.start(), *self.backoff.end());
        if high <= low {
            return low;
        }
        let millis = rand::thread_rng().gen_range(low.as_millis()..=high.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. Exhaustion wraps the last error in
    /// [`FetchError::Exhausted`].
    pub async fn run<F, Fut, T>(&self, url: &str, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(url, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !(self.classifier)(&err) {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                tracing::warn!(url, attempts = attempt, error = %err, "retries exhausted");
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay();
            tracing::debug!(
                url,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
