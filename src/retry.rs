//! Fixed-delay retry of one logical call.
//!
//! [`retry_with_delay`] drives the attempts of a call made through
//! [`InvocationProducer`](crate::InvocationProducer):
//!
//! - up to `retry_count + 1` attempts
//! - a constant `retry_delay` pause between attempts, no backoff, no jitter
//! - [`RetryPolicy`](crate::RetryPolicy) decides which failures are retried
//! - usage errors (`NotStarted`, `AlreadyStarted`, `DuplicateCorrelationId`,
//!   `InvalidConfig`) are never retried
//! - [`RpcError::Cancelled`] ends the loop at once and is returned unwrapped
//! - once `stopped` reads `true` the loop ends with [`RpcError::Cancelled`],
//!   including in the middle of a retry delay
//!
//! Any other final failure is wrapped once in [`RpcError::Invocation`],
//! keeping the last cause as its source.

use std::future::Future;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::{log_debug, log_warn, Result, RpcConfig, RpcError};

fn never_retried(err: &RpcError) -> bool {
    matches!(
        err,
        RpcError::NotStarted
            | RpcError::AlreadyStarted
            | RpcError::DuplicateCorrelationId(_)
            | RpcError::InvalidConfig(_)
    )
}

/// Run `operation` until it succeeds, the retry budget in `config` is spent,
/// or `stopped` turns `true`.
pub(crate) async fn retry_with_delay<F, Fut, T>(
    config: &RpcConfig,
    mut stopped: watch::Receiver<bool>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // ---
    let attempts = config.retry_count.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(RpcError::Cancelled) => return Err(RpcError::Cancelled),
            Err(err) => err,
        };

        if *stopped.borrow() {
            log_debug!("attempt {attempt}/{attempts} failed after stop: {err}");
            return Err(RpcError::Cancelled);
        }

        if never_retried(&err) || !config.retry_policy.should_retry(&err) {
            log_debug!("attempt {attempt}/{attempts} failed, not retrying: {err}");
            return Err(RpcError::invocation(err));
        }

        if attempt >= attempts {
            log_warn!("call failed after {attempts} attempts: {err}");
            return Err(RpcError::invocation(err));
        }

        log_warn!(
            "attempt {attempt}/{attempts} failed, retrying in {:?}: {err}",
            config.retry_delay
        );

        tokio::select! {
            biased;
            // a dropped sender disables this branch
            Ok(_) = stopped.wait_for(|stopped| *stopped) => {
                log_debug!("stopped during retry delay after attempt {attempt}");
                return Err(RpcError::Cancelled);
            }
            () = sleep(config.retry_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn running() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    fn config(retry_count: u32) -> RpcConfig {
        RpcConfig::default()
            .with_retry_count(retry_count)
            .with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_no_retry_on_success() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));

        let (_stop, stopped) = running();
        let result = retry_with_delay(&config(3), stopped, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RpcError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_later_attempt() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));

        let (_stop, stopped) = running();
        let result = retry_with_delay(&config(3), stopped, || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RpcError::Timeout { timeout_ms: 5 })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_makes_retry_count_plus_one_attempts() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let (_stop, stopped) = running();
        let result = retry_with_delay(&config(2), stopped, || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RpcError::Connection(format!("down #{n}")))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // two pauses of 10ms between three attempts
        assert!(started.elapsed() >= Duration::from_millis(20));

        let err = result.unwrap_err();
        assert!(matches!(err, RpcError::Invocation { .. }));
        assert!(matches!(err.cause(), Some(RpcError::Connection(msg)) if msg == "down #2"));
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));

        let (_stop, stopped) = running();
        let result = retry_with_delay(&config(0), stopped, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RpcError::Timeout { timeout_ms: 1 })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_can_refuse_retry() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let cfg = config(5).with_retry_policy(RetryPolicy::new(|err| {
            !matches!(err, RpcError::Remote(_))
        }));

        let (_stop, stopped) = running();
        let result = retry_with_delay(&cfg, stopped, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RpcError::Remote("division by zero".into()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err().cause(),
            Some(RpcError::Remote(msg)) if msg == "division by zero"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_and_usage_errors_stop_immediately() {
        // ---
        for err in [RpcError::Cancelled, RpcError::NotStarted] {
            let calls = Arc::new(AtomicU32::new(0));
            let is_cancel = matches!(err, RpcError::Cancelled);
            let slot = Arc::new(std::sync::Mutex::new(Some(err)));

            let (_stop, stopped) = running();
        let result = retry_with_delay(&config(3), stopped, || {
                let calls = Arc::clone(&calls);
                let slot = Arc::clone(&slot);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(slot.lock().unwrap().take().unwrap())
                }
            })
            .await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            if is_cancel {
                assert!(matches!(result, Err(RpcError::Cancelled)));
            } else {
                assert!(matches!(
                    result.unwrap_err().cause(),
                    Some(RpcError::NotStarted)
                ));
            }
        }
    }

    #[tokio::test]
    async fn test_stop_during_delay_cancels_at_once() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let (stop, stopped) = running();
        let cfg = config(3).with_retry_delay(Duration::from_secs(5));

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stop.send_replace(true);
            stop
        });

        let started = Instant::now();
        let result = retry_with_delay(&cfg, stopped, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RpcError::Timeout { timeout_ms: 1 })
            }
        })
        .await;

        assert!(matches!(result, Err(RpcError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        let _stop = stopper.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_after_stop_is_cancelled() {
        // ---
        let (stop, stopped) = running();
        stop.send_replace(true);

        let result = retry_with_delay(&config(3), stopped, || async {
            Err::<(), _>(RpcError::Connection("cannot subscribe while disconnected".into()))
        })
        .await;

        assert!(matches!(result, Err(RpcError::Cancelled)));
    }
}
