//! Per-operation timeout and exponential backoff (spec.md §5): base 1s,
//! multiplier 2, capped at 10s; only `Throttled`/`Transient` errors retry.

use novadb_core::{NovaError, Result};
use std::future::Future;
use std::time::Duration;

const BASE: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(10);
const MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let scaled = BASE.saturating_mul(MULTIPLIER.saturating_pow(attempt));
        scaled.min(CAP)
    }
}

/// Retries `op` while it returns a retryable error, per `policy.max_retries`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bounds `fut` by `deadline`, surfacing `NovaError::Timeout` on expiry.
pub async fn with_timeout<T>(deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(NovaError::timeout(format!("operation exceeded {deadline:?} deadline"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_errors_up_to_max() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy { max_retries: 2 };
        let a = attempts.clone();
        let result: Result<u32> = with_retry(&policy, || {
            let a = a.clone();
            async move {
                let n = a.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(NovaError::Transient(Default::default()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy { max_retries: 3 };
        let a = attempts.clone();
        let result: Result<u32> = with_retry(&policy, || {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(NovaError::invalid_input("bad"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_wraps_slow_future() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(NovaError::Timeout(_))));
    }
}
