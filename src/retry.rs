//! Bounded exponential backoff around a single remote call.

use std::future::Future;

use tokio::time::{Duration, sleep};

use crate::error::{StudioError, StudioResult};

/// Retry budget for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubles on every following retry.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Budget used for each poll of a long-running operation.
    pub fn poll_default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }

    /// The wait before retry `n` (0-based) under this policy.
    pub fn delay_for(&self, retry: u32) -> Duration {
        match 1u32.checked_shl(retry) {
            Some(factor) => self.initial_delay.saturating_mul(factor),
            None => Duration::MAX,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable kind, or
/// the rate-limit budget in `policy` is spent.
///
/// Every invocation owns its own counter and delay, so wrappers can be
/// nested (a poll with its own budget inside a polling loop) without
/// interfering.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut operation: F) -> StudioResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StudioResult<T>>,
{
    let mut retries_used: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.kind.is_retryable() => return Err(err),
            Err(err) => {
                let attempt = retries_used + 1;
                if retries_used == policy.max_retries {
                    tracing::warn!(call = label, attempts = attempt, error = %err, "rate limit budget exhausted");
                    return Err(StudioError::quota_exceeded(attempt));
                }
                let delay = policy.delay_for(retries_used);
                tracing::warn!(
                    call = label,
                    attempt,
                    retries_left = policy.max_retries - retries_used,
                    next_delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                sleep(delay).await;
                retries_used += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiFailure, ErrorKind};
    use std::cell::RefCell;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_with_doubling_delay_then_gives_up() {
        let calls = RefCell::new(Vec::<Instant>::new());
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));

        let result: StudioResult<()> = with_retry(policy, "test", || {
            calls.borrow_mut().push(Instant::now());
            async { Err(ApiFailure::from_response(429, "slow down").into_error()) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert!(err.message.contains("quota exceeded"));

        let calls = calls.into_inner();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<u128> = calls.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![2000, 4000, 8000]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_key_fails_on_first_attempt() {
        let calls = RefCell::new(0u32);
        let started = Instant::now();

        let result: StudioResult<()> = with_retry(RetryPolicy::default(), "test", || {
            *calls.borrow_mut() += 1;
            async {
                Err(ApiFailure {
                    http_status: Some(400),
                    message: "API key not valid. Please pass a valid API key.".into(),
                    ..Default::default()
                }
                .into_error())
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidCredential);
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_rate_limit() {
        let calls = RefCell::new(0u32);
        let value = with_retry(RetryPolicy::new(5, Duration::from_millis(10)), "test", || {
            let n = {
                let mut c = calls.borrow_mut();
                *c += 1;
                *c
            };
            async move {
                if n < 3 {
                    Err(StudioError::new(ErrorKind::RateLimited, "429"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn nested_wrappers_keep_separate_budgets() {
        let inner_calls = RefCell::new(0u32);
        let outer_calls = RefCell::new(0u32);
        let outer = RetryPolicy::new(1, Duration::from_millis(100));
        let inner = RetryPolicy::new(2, Duration::from_millis(10));

        let result: StudioResult<()> = with_retry(outer, "outer", || {
            *outer_calls.borrow_mut() += 1;
            let inner_calls = &inner_calls;
            async move {
                with_retry(inner, "inner", || {
                    *inner_calls.borrow_mut() += 1;
                    async { Err(StudioError::new(ErrorKind::RateLimited, "429")) }
                })
                .await
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::RateLimited);
        assert_eq!(*outer_calls.borrow(), 2);
        assert_eq!(*inner_calls.borrow(), 6);
    }

    #[test]
    fn delay_schedule_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_millis(2000));
        assert_eq!(p.delay_for(3), Duration::from_millis(16000));
        assert_eq!(p.delay_for(40), Duration::MAX);
    }
}
