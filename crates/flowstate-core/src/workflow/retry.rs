//! Retry handling for Task invocations.
//!
//! Stateless: all state (per-policy attempt counters) lives on the stack of
//! one [`RetryHandler::run_with_retry`] call, so it is scoped to a single
//! execution of a single Task state.
//!
//! Policies are matched in declaration order; the first policy whose
//! `ErrorEquals` accepts the error governs. Each policy counts its own
//! attempts: `MaxAttempts` is the total number of invocations that policy
//! allows, including the first. The wait before attempt `k + 1` under a
//! policy is `IntervalSeconds * BackoffRate^(k - 1)`, capped by
//! `MaxDelaySeconds`; `FULL` jitter adds a uniform random extra in
//! `[0, delay]`.

use std::future::Future;
use std::time::Duration;

use flowstate_types::definition::{JitterStrategy, RetryPolicy};
use flowstate_types::error::{ClassifiedError, ErrorClass};
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Longest single wait, in seconds (one day).
const MAX_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Error, PartialEq)]
pub enum RetryError {
    /// No policy matched, or the matching policy ran out of attempts.
    #[error(transparent)]
    Exhausted(ClassifiedError),

    /// Cancellation arrived while waiting between attempts.
    #[error("retry wait cancelled")]
    Cancelled,
}

pub struct RetryHandler;

impl RetryHandler {
    /// Index of the first policy matching `error`.
    pub fn matching_policy(policies: &[RetryPolicy], error: &ErrorClass) -> Option<usize> {
        policies
            .iter()
            .position(|p| ErrorClass::any_matches(&p.error_equals, error))
    }

    /// Delay after the `attempt`-th failed invocation under `policy`,
    /// before jitter. `attempt` is 1-based.
    pub fn base_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = policy.interval_seconds * policy.backoff_rate.powi(exponent);
        if let Some(max) = policy.max_delay_seconds {
            secs = secs.min(max);
        }
        Duration::from_secs_f64(clamp_secs(secs))
    }

    /// [`base_delay`](Self::base_delay) plus jitter.
    pub fn delay_with_jitter(policy: &RetryPolicy, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = Self::base_delay(policy, attempt);
        match policy.jitter_strategy {
            JitterStrategy::None => base,
            JitterStrategy::Full => {
                let extra = rng.gen_range(0.0..=base.as_secs_f64());
                Duration::from_secs_f64(clamp_secs(base.as_secs_f64() + extra))
            }
        }
    }

    /// Run `action` until it succeeds, no policy matches its error, or the
    /// matching policy is exhausted.
    ///
    /// `action` receives the 1-based attempt number across all policies.
    /// Waits are abandoned when `cancel` fires.
    pub async fn run_with_retry<T, F, Fut>(
        policies: &[RetryPolicy],
        cancel: &CancellationToken,
        mut action: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut used = vec![0u32; policies.len()];
        let mut attempt = 1u32;

        loop {
            let error = match action(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(index) = Self::matching_policy(policies, &error.class) else {
                tracing::debug!(attempt, error = %error.class, "no retry policy matches");
                return Err(RetryError::Exhausted(error));
            };
            let policy = &policies[index];
            used[index] += 1;
            if used[index] >= policy.max_attempts {
                tracing::debug!(
                    attempt,
                    policy = index,
                    max_attempts = policy.max_attempts,
                    error = %error.class,
                    "retry policy exhausted"
                );
                return Err(RetryError::Exhausted(error));
            }

            let delay = Self::delay_with_jitter(policy, used[index], &mut rand::thread_rng());
            tracing::info!(
                attempt,
                policy = index,
                delay_ms = delay.as_millis() as u64,
                error = %error.class,
                cause = %error.cause,
                "retrying task"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn clamp_secs(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.clamp(0.0, MAX_DELAY_SECS)
    } else {
        MAX_DELAY_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn policy(errors: &[&str], max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            error_equals: errors.iter().map(|e| ErrorClass::from(*e)).collect(),
            interval_seconds: 1.0,
            max_attempts,
            backoff_rate: 2.0,
            jitter_strategy: JitterStrategy::None,
            max_delay_seconds: None,
        }
    }

    #[test]
    fn test_backoff_grows_geometrically() {
        let p = policy(&["States.ALL"], 5);
        assert_eq!(RetryHandler::base_delay(&p, 1), Duration::from_secs(1));
        assert_eq!(RetryHandler::base_delay(&p, 2), Duration::from_secs(2));
        assert_eq!(RetryHandler::base_delay(&p, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_caps_backoff() {
        let mut p = policy(&["States.ALL"], 10);
        p.max_delay_seconds = Some(3.0);
        assert_eq!(RetryHandler::base_delay(&p, 4), Duration::from_secs(3));
        assert_eq!(
            RetryHandler::base_delay(&p, u32::MAX),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_full_jitter_stays_within_bounds() {
        let mut p = policy(&["States.ALL"], 3);
        p.jitter_strategy = JitterStrategy::Full;
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let d = RetryHandler::delay_with_jitter(&p, 2, &mut rng);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_first_matching_policy_wins() {
        let policies = vec![policy(&["ThrottlingError"], 2), policy(&["States.ALL"], 5)];
        assert_eq!(
            RetryHandler::matching_policy(&policies, &ErrorClass::Throttling),
            Some(0)
        );
        assert_eq!(
            RetryHandler::matching_policy(&policies, &ErrorClass::TransientService),
            Some(1)
        );

        let reordered = vec![policy(&["States.ALL"], 5), policy(&["ThrottlingError"], 2)];
        assert_eq!(
            RetryHandler::matching_policy(&reordered, &ErrorClass::Throttling),
            Some(0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_max_attempts_with_backoff() {
        let policies = vec![policy(&["ThrottlingError"], 3)];
        let start = Instant::now();
        let calls = Mutex::new(Vec::new());
        let result: Result<(), _> =
            RetryHandler::run_with_retry(&policies, &CancellationToken::new(), |attempt| {
                calls.lock().unwrap().push((attempt, start.elapsed()));
                async { Err(ClassifiedError::throttling("rate exceeded")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted(ref e)) if e.class == ErrorClass::Throttling));
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], (1, Duration::ZERO));
        assert_eq!(calls[1], (2, Duration::from_secs(1)));
        assert_eq!(calls[2], (3, Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policies = vec![policy(&["ThrottlingError"], 3)];
        let calls = AtomicU32::new(0);
        let result = RetryHandler::run_with_retry(&policies, &CancellationToken::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClassifiedError::throttling("busy"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_error_is_not_retried() {
        let policies = vec![policy(&["ThrottlingError"], 3)];
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            RetryHandler::run_with_retry(&policies, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClassifiedError::invalid_input("bad payload")) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policies_count_attempts_independently() {
        // Two throttles then two transient faults. Each policy tolerates two
        // failures on its own counter, so the fifth invocation happens.
        let policies = vec![policy(&["ThrottlingError"], 3), policy(&["TransientServiceError"], 3)];
        let calls = AtomicU32::new(0);
        let result = RetryHandler::run_with_retry(&policies, &CancellationToken::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 | 1 => Err(ClassifiedError::throttling("busy")),
                    2 | 3 => Err(ClassifiedError::transient("flaky")),
                    _ => Ok(n),
                }
            }
        })
        .await;
        assert_eq!(result, Ok(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let policies = vec![policy(&["States.ALL"], 3)];
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let result: Result<(), _> = RetryHandler::run_with_retry(&policies, &cancel, |_| async {
            Err(ClassifiedError::unknown("boom"))
        })
        .await;
        assert_eq!(result, Err(RetryError::Cancelled));
    }
}
