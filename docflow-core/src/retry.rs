//! Retry with exponential backoff.
//!
//! [`retry_with_policy`] is a reusable higher-order wrapper: it takes a
//! [`RetryPolicy`] and a fallible async operation and returns either the value
//! together with the number of attempts it took, or a [`RetryError`].

use std::{
    future::Future,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FlowError, Result, RetryError};

/// Relative spread applied to a backoff delay when jitter is enabled.
pub const JITTER_FRACTION: f64 = 0.25;

/// Retry configuration shared by agents and workflow steps.
///
/// Durations are expressed in seconds so the policy reads naturally from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in seconds.
    pub backoff_base: f64,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay, in seconds.
    pub max_backoff_cap: f64,
    /// Spread each delay by up to ±25%.
    pub jitter: bool,
    /// Per-attempt timeout in seconds. A timed out attempt is a provider failure.
    pub attempt_timeout: Option<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 1.0,
            backoff_multiplier: 2.0,
            max_backoff_cap: 30.0,
            jitter: true,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, multiplier: f64) -> Self {
        self.backoff_base = base.as_secs_f64();
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, cap: Duration) -> Self {
        self.max_backoff_cap = cap.as_secs_f64();
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout.as_secs_f64());
        self
    }

    /// Check the policy for values that would make retrying meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FlowError::configuration("max_attempts must be at least 1"));
        }
        if !representable(self.backoff_base) {
            return Err(FlowError::configuration(
                "backoff_base must be a non-negative number of seconds",
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(FlowError::configuration(
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if !representable(self.max_backoff_cap) {
            return Err(FlowError::configuration(
                "max_backoff_cap must be a non-negative number of seconds",
            ));
        }
        if let Some(timeout) = self.attempt_timeout
            && !(representable(timeout) && timeout > 0.0)
        {
            return Err(FlowError::configuration(
                "attempt_timeout must be a positive number of seconds",
            ));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = self.backoff_base * self.backoff_multiplier.powi(exponent);
        if self.jitter {
            let spread = (fastrand::f64() * 2.0 - 1.0) * JITTER_FRACTION;
            secs *= 1.0 + spread;
        }
        let secs = secs.min(self.max_backoff_cap).max(0.0);
        if secs.is_finite() {
            saturating_secs(secs)
        } else {
            saturating_secs(self.max_backoff_cap)
        }
    }

    /// The configured per-attempt timeout, if any.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout.map(saturating_secs)
    }
}

/// Non-negative seconds that fit in a [`Duration`].
fn representable(secs: f64) -> bool {
    secs >= 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// Seconds as a [`Duration`], clamped to `ZERO..=MAX`.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// A value produced by a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> Attempted<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempted<U> {
        Attempted {
            value: f(self.value),
            attempts: self.attempts,
            elapsed: self.elapsed,
        }
    }
}

/// Sleep for `delay`, returning early with [`FlowError::Cancelled`] if the token fires.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(FlowError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(FlowError::Cancelled),
    }
}

/// Run `op` under `policy`, retrying errors for which [`FlowError::is_retryable`] holds.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op: F,
) -> std::result::Result<Attempted<T>, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_policy_if(policy, cancel, FlowError::is_retryable, op).await
}

/// Run `op` under `policy`, retrying errors accepted by `should_retry`.
///
/// `op` receives the 1-based attempt number. Cancellation is observed before
/// every attempt, during backoff, and after an attempt returns; in the last case
/// the attempt's result is discarded.
pub async fn retry_with_policy_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    should_retry: P,
    mut op: F,
) -> std::result::Result<Attempted<T>, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&FlowError) -> bool,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let timeout = policy.attempt_timeout();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::new(FlowError::Cancelled, attempt, start.elapsed()));
        }
        attempt += 1;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FlowError::provider(format!(
                    "attempt {attempt} timed out after {limit:?}"
                ))),
            },
            None => op(attempt).await,
        };

        if cancel.is_cancelled() {
            return Err(RetryError::new(FlowError::Cancelled, attempt, start.elapsed()));
        }

        let error = match outcome {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                    elapsed: start.elapsed(),
                });
            }
            Err(error) => error,
        };

        if !should_retry(&error) {
            debug!(attempt, error = %error, "not retrying");
            return Err(RetryError::new(error, attempt, start.elapsed()));
        }
        if attempt >= max_attempts {
            warn!(attempt, max_attempts, error = %error, "retry budget exhausted");
            return Err(RetryError::new(error, attempt, start.elapsed()));
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(attempt, max_attempts, ?delay, error = %error, "attempt failed, backing off");
        if let Err(cancelled) = sleep_or_cancel(delay, cancel).await {
            return Err(RetryError::new(cancelled, attempt, start.elapsed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_backoff(Duration::from_millis(1), 2.0)
            .with_jitter(false)
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_secs(1), 2.0)
            .with_max_backoff(Duration::from_secs(5))
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_secs(2), 1.0)
            .with_jitter(true);

        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1).as_secs_f64();
            assert!((1.5..=2.5).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());

        let bad_multiplier = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(bad_multiplier.validate().is_err());
    }

    #[test]
    fn test_out_of_range_seconds_saturate() {
        let huge = RetryPolicy {
            max_attempts: 2,
            backoff_base: 1e30,
            max_backoff_cap: 1e300,
            jitter: false,
            attempt_timeout: Some(1e300),
            ..RetryPolicy::default()
        };
        assert!(huge.validate().is_err());
        assert!(RetryPolicy { max_backoff_cap: 1e300, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { attempt_timeout: Some(1e20), ..RetryPolicy::default() }.validate().is_err());

        assert_eq!(huge.delay_for_attempt(1), Duration::MAX);
        assert_eq!(huge.delay_for_attempt(u32::MAX), Duration::MAX);
        assert_eq!(huge.attempt_timeout(), Some(Duration::MAX));

        let negative = RetryPolicy {
            backoff_base: -1.0,
            ..RetryPolicy::default()
        };
        assert_eq!(negative.with_jitter(false).delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_yaml_uses_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 5\njitter: false\n").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert!(!policy.jitter);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = calls.clone();
        let result = retry_with_policy(&fast_policy(4), &cancel, move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FlowError::provider("throttled"))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let cancel = CancellationToken::new();
        let err = retry_with_policy(&fast_policy(3), &cancel, |_| async {
            Err::<(), _>(FlowError::provider("down"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.error, FlowError::provider("down"));
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let cancel = CancellationToken::new();
        let err = retry_with_policy(&fast_policy(5), &cancel, |_| async {
            Err::<(), _>(FlowError::schema_violation("not json"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable() {
        let cancel = CancellationToken::new();
        let policy = fast_policy(2).with_attempt_timeout(Duration::from_millis(5));

        let result = retry_with_policy(&policy, &cancel, |attempt| async move {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(attempt)
        })
        .await
        .unwrap();

        assert_eq!(result.value, 2);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = retry_with_policy(&fast_policy(3), &cancel, |_| async { Ok(()) })
            .await
            .unwrap_err();

        assert_eq!(err.error, FlowError::Cancelled);
        assert_eq!(err.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_result() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let err = retry_with_policy(&fast_policy(3), &cancel, move |_| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Ok("late value")
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.error, FlowError::Cancelled);
        assert_eq!(err.attempts, 1);
    }
}
