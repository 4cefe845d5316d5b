// Bounded retry with linear-times-base backoff.
//
// Attempt i failing waits `base_delay * i` before attempt i + 1 (1s, 2s, 3s ... for a
// 1s base). Operations passed here must be safe to repeat.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("exhausted {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error("gave up on attempt {attempt}: {source}")]
    Aborted {
        attempt: u32,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The underlying error of the final attempt.
    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { source, .. } => source,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { source, .. } => source,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Retry every failure until `max_attempts` is reached.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute_when(op, |_| true).await
    }

    /// Like `execute`, but an error for which `is_retryable` returns false is
    /// returned immediately as `RetryError::Aborted`.
    pub async fn execute_when<F, Fut, T, E, P>(
        &self,
        mut op: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => {
                    debug!(attempt, error = %e, "non-retryable failure");
                    return Err(RetryError::Aborted { attempt, source: e });
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(attempts = attempt, error = %e, "retries exhausted");
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, thiserror::Error)]
    #[error("boom #{0}")]
    struct Boom(u32);

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_n_minus_one_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = RetryExecutor::new(5, Duration::from_millis(100));

        let c = calls.clone();
        let result = retry
            .execute(|| {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(Boom(n)) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = RetryExecutor::new(3, Duration::from_millis(100));

        let c = calls.clone();
        let result: Result<(), _> = retry
            .execute(|| {
                let c = c.clone();
                async move { Err(Boom(c.fetch_add(1, Ordering::SeqCst) + 1)) }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.0, 3);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_grows_with_attempt_index() {
        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let retry = RetryExecutor::new(4, Duration::from_millis(250));

        let s = stamps.clone();
        let _: Result<(), _> = retry
            .execute(|| {
                let s = s.clone();
                async move {
                    s.lock().push(Instant::now());
                    Err(Boom(0))
                }
            })
            .await;

        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 4);
        for i in 1..stamps.len() {
            let gap = stamps[i] - stamps[i - 1];
            let expected = Duration::from_millis(250) * i as u32;
            let diff = if gap > expected { gap - expected } else { expected - gap };
            assert!(diff <= Duration::from_millis(5), "gap {i}: {gap:?} vs {expected:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = RetryExecutor::new(5, Duration::from_millis(100));

        let c = calls.clone();
        let result: Result<(), _> = retry
            .execute_when(
                || {
                    let c = c.clone();
                    async move { Err(Boom(c.fetch_add(1, Ordering::SeqCst) + 1)) }
                },
                |_| false,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempt: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let retry = RetryExecutor::new(0, Duration::from_secs(1));
        assert_eq!(retry.max_attempts(), 1);
        assert_eq!(retry.delay_after(3), Duration::from_secs(3));
    }
}
