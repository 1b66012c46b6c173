//! Timeouts and bounded retry for embedding and storage calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use kbase_core::config::RetrySettings;
use kbase_core::{Error, Result};

/// Runs `fut`, turning expiry into [`Error::Timeout`].
pub async fn with_timeout<T>(operation: &str, after: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { operation: operation.to_string(), after })?
}

/// Calls `f` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is used up.
pub async fn retry<T, F, Fut>(policy: &RetrySettings, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(operation, attempt, ?delay, error = %e, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy() -> RetrySettings { RetrySettings { max_attempts: 3, base_delay_ms: 1 } }

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_limit() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&policy(), "store", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::storage("disk busy"))
        })
        .await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_dimension_mismatch() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&policy(), "search", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::DimensionMismatch { expected: 4, actual: 8 })
        })
        .await;
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_a_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = retry(&policy(), "embed", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::embedding("warming up"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn expiry_is_a_timeout() {
        let err = with_timeout("embed", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref operation, .. } if operation == "embed"), "{err}");
    }
}
