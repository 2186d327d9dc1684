//! Bounded retry with exponential backoff.
//!
//! Backoff is deterministic: attempt `n` waits `initial_wait * multiplier^(n-1)`,
//! capped at `max_wait`. The wait races the cancellation token.

use crate::utils::errors::{Cancelled, Error};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub max_wait: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_wait.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs < 0.0 || secs >= self.max_wait.as_secs_f64() {
            return self.max_wait;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is exhausted (the last error is returned).
pub async fn with_retry<T, E, F, Fut, P>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display + From<Cancelled>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_retryable(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let wait = config.backoff(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            error = %err,
            next_wait_ms = wait.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            _ = tokio::time::sleep(wait) => {}
        }
        attempt += 1;
    }
}

/// [`with_retry`] using the crate's own error classification.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    with_retry(cancel, config, operation, Error::is_retryable, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let cfg = RetryConfig {
            max_attempts: 10,
            initial_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(cfg.backoff(1), Duration::from_secs(1));
        assert_eq!(cfg.backoff(2), Duration::from_secs(2));
        assert_eq!(cfg.backoff(3), Duration::from_secs(4));
        assert_eq!(cfg.backoff(4), Duration::from_secs(5));
        assert_eq!(cfg.backoff(60), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let c = calls.clone();
        let result = retry(&cancel, &config(), "flaky", move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Error::Database("connection refused".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let cfg = RetryConfig {
            max_attempts: 10,
            ..config()
        };

        let c = calls.clone();
        let result: Result<(), Error> = retry(&cancel, &cfg, "connect", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Database(
                    "FATAL: password authentication failed for user \"app\"".into(),
                ))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let c = calls.clone();
        let result: Result<(), Error> = retry(&cancel, &config(), "write", move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err(Error::Database(format!("timeout #{n}")))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "Database error: timeout #3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let cfg = RetryConfig {
            initial_wait: Duration::from_secs(10),
            max_wait: Duration::from_secs(60),
            ..config()
        };

        let c = calls.clone();
        let trigger = cancel.clone();
        let task = tokio::spawn(async move {
            retry(&trigger, &cfg, "dump", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::Database("connection reset".into()))
                }
            })
            .await
        });

        // Past the first wait (10s), inside the second (20s).
        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_predicate() {
        #[derive(Debug)]
        enum Flaky {
            Busy,
            Stopped,
        }
        impl Display for Flaky {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{self:?}")
            }
        }
        impl From<Cancelled> for Flaky {
            fn from(_: Cancelled) -> Self {
                Flaky::Stopped
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let c = calls.clone();
        let result: Result<(), Flaky> = with_retry(
            &cancel,
            &config(),
            "generic",
            |e| matches!(e, Flaky::Busy),
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky::Busy)
                }
            },
        )
        .await;

        assert!(matches!(result, Err(Flaky::Busy)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
