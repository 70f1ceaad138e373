use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::error::SyncError;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// Bounded retry budget shared by network calls and per-file operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn network(attempts: u32) -> Self {
        Self::new(
            attempts,
            Backoff::new(Duration::from_millis(500), Duration::from_secs(8), true),
        )
    }

    pub fn per_file(attempts: u32) -> Self {
        Self::new(
            attempts,
            Backoff::new(Duration::from_millis(200), Duration::from_secs(2), true),
        )
    }

    /// No waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Backoff::new(Duration::ZERO, Duration::ZERO, false))
    }

    /// Retries `op` while it fails with a retryable (transient network) error.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.run_while(label, SyncError::is_retryable, op).await
    }

    pub async fn run_while<T, F, Fut, P>(
        &self,
        label: &str,
        should_retry: P,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
        P: Fn(&SyncError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.attempts && should_retry(&err) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        %label,
                        attempt = attempt + 1,
                        of = self.attempts,
                        ?delay,
                        error = %err,
                        "retrying"
                    );
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
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(800),
            false,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            backoff.delay_with_rng(0, &mut rng),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff.delay_with_rng(2, &mut rng),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff.delay_with_rng(5, &mut rng),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn backoff_with_jitter_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), true);
        let mut rng = StdRng::seed_from_u64(42);
        let delay = backoff.delay_with_rng(3, &mut rng);
        assert!(delay <= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn retry_stops_after_budget_is_exhausted() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), SyncError> = RetryPolicy::immediate(3)
            .run("latest", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Unreachable("timeout".into()))
            })
            .await;
        assert!(matches!(result, Err(SyncError::Unreachable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_permanent_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), SyncError> = RetryPolicy::immediate(5)
            .run("tree", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::NotFound("textures/SLUS".into()))
            })
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = RetryPolicy::immediate(3)
            .run("latest", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SyncError::Unreachable("reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
