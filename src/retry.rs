use std::future::Future;
use std::time::Duration;

use chrono::Local;

use crate::{warn_time, Error, Result};

/// Bounded exponential backoff, applied uniformly to every backend call.
///
/// Delays double per attempt from `base_delay` up to `max_delay`, plus a
/// jitter draw so concurrent workers don't retry in lockstep. Rate-limit
/// responses wait twice as long.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << (attempt - 1).min(16));
        let jitter = Duration::from_millis(fastrand::u64(0..=self.jitter.as_millis() as u64));
        exp.min(self.max_delay) + jitter
    }

    /// Runs `op` until it succeeds, fails non-transiently, or the attempt
    /// budget runs out. The last error is returned in the failing cases.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let mut delay = self.delay_for(attempt);
                    if matches!(err, Error::RateLimited) {
                        delay *= 2;
                    }
                    warn_time!("Attempt {} failed ({}), retrying in {:?}", attempt, err, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = quick();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4));
        assert_eq!(policy.delay_for(5), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn transient_failures_below_the_budget_are_absorbed() {
        let calls = AtomicU32::new(0);
        let res: Result<u32> = quick()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::RateLimited)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_the_last_error() {
        let calls = AtomicU32::new(0);
        let res: Result<u32> = quick()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::RateLimited) }
            })
            .await;
        assert!(matches!(res, Err(Error::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<u32> = quick()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::UnknownShape("trillion".into())) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
