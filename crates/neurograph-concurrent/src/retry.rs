//! Smart delay: exponential backoff with jitter for throttled and transient
//! failures. Throttled errors get the full schedule; transient ones a shorter
//! fuse. Everything else surfaces immediately.

#[cfg_attr(not(test), allow(unused_imports))]
use neurograph_core::NeuroGraphError;
use neurograph_core::{Result, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub fn backoff_delay(config: &RetryConfig, attempt: u32, throttled: bool) -> Duration {
    let base = if throttled {
        config.base_delay
    } else {
        config.transient_base_delay
    };
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let jitter = Duration::from_millis(rand::rng().random_range(0..=base.as_millis().max(1) as u64));
    (exp + jitter).min(config.max_delay)
}

pub async fn with_retry<T, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                let throttled = e.is_throttled();
                let budget = if throttled {
                    config.max_attempts
                } else {
                    config.transient_max_attempts
                };
                attempt += 1;
                if attempt >= budget {
                    warn!(op = op_name, attempts = attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
                let delay = backoff_delay(config, attempt - 1, throttled);
                debug!(op = op_name, attempt, ?delay, throttled, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1),
            transient_base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn throttled_errors_retry_to_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let out = with_retry(&fast_config(), "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(NeuroGraphError::Throttled("429".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn transient_schedule_is_shorter() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<u32> = with_retry(&fast_config(), "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(NeuroGraphError::Transient("reset".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(
            calls.load(Ordering::SeqCst),
            fast_config().transient_max_attempts
        );
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<u32> = with_retry(&fast_config(), "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(NeuroGraphError::NotFound("x".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(NeuroGraphError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let config = fast_config();
        assert!(backoff_delay(&config, 30, true) <= config.max_delay);
    }
}
