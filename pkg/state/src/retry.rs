use std::future::Future;
use std::time::Duration;

use pkg_constants::state::{RETRY_BACKOFF_FACTOR, RETRY_BASE_DELAY_MS, RETRY_MAX_STEPS};

use crate::client::{Result, StateError};

/// Run a read-modify-write closure, retrying with bounded exponential
/// backoff while it fails on a write conflict. The closure must re-read
/// current state on every attempt; any other error is returned immediately.
pub async fn retry_on_conflict<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut conflict_key = String::new();
    for step in 0..RETRY_MAX_STEPS {
        if step > 0 {
            tokio::time::sleep(delay).await;
            delay *= RETRY_BACKOFF_FACTOR as u32;
        }
        match operation().await {
            Err(StateError::Conflict { key }) => conflict_key = key,
            other => return other,
        }
    }
    Err(StateError::Conflict { key: conflict_key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_non_conflict() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u32> = retry_on_conflict(|| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StateError::Conflict {
                        key: "/k".to_string(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_steps() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = retry_on_conflict(|| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StateError::Conflict {
                    key: "/k".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StateError::Conflict { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), RETRY_MAX_STEPS);
    }

    #[tokio::test]
    async fn other_errors_pass_through() {
        let result: Result<()> = retry_on_conflict(|| async {
            Err(StateError::NotFound {
                key: "/k".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(StateError::NotFound { .. })));
    }
}
