//! Retry policy and driver
//!
//! Exponential backoff with ±10 % jitter. The jitter source is injected so
//! tests see deterministic delays, and every backoff sleep observes the
//! workflow's cancellation token.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use windlass_core::{RetryConfig, RetryPredicate};

use crate::executor::ActionError;

/// Status codes the engine considers retryable by default. Advisory: an
/// explicit `retry_on` list always wins.
pub const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Whether `code` is in the default retryable set.
pub fn is_retryable_status(code: u16) -> bool {
    DEFAULT_RETRYABLE_STATUS.contains(&code)
}

const JITTER_BAND: f64 = 0.1;

/// Source of jitter factors in `[-1, 1]`, scaled by the ±10 % band.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Production source backed by the thread RNG.
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

/// Deterministic source for tests.
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Compiled retry behaviour for one action.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retry_on: Vec<RetryPredicate>,
}

impl RetryPolicy {
    /// One attempt, no retry. What actions without a `retry` block get.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            retry_on: Vec::new(),
        }
    }

    /// Compile a document retry block. Absent config, or `max_attempts`
    /// ≤ 0, means a single attempt.
    pub fn from_config(config: Option<&RetryConfig>) -> Self {
        let Some(config) = config else {
            return Self::single_attempt();
        };
        if config.max_attempts <= 1 {
            return Self::single_attempt();
        }
        Self {
            max_attempts: config.max_attempts.min(u32::MAX as i64) as u32,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.multiplier.max(1.0),
            retry_on: config.retry_on.clone(),
        }
    }

    /// Backoff before the retry that follows failing attempt `attempt`
    /// (1-indexed): `min(initial · multiplier^(attempt-1), max)` with
    /// jitter, bounded below by the initial delay.
    pub fn delay_after_attempt(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = capped * (1.0 + JITTER_BAND * jitter.sample());
        Duration::from_secs_f64(jittered.max(self.initial_delay.as_secs_f64()))
    }

    /// Whether a failure with this text is retryable. An empty predicate
    /// list retries any failure.
    pub fn should_retry(&self, error_text: &str) -> bool {
        if self.retry_on.is_empty() {
            return true;
        }
        self.retry_on.iter().any(|p| p.matches(error_text))
    }
}

/// How one action's attempt chain ended.
#[derive(Debug)]
pub enum RetryOutcome {
    Success { output: String, attempts: u32 },
    Failed { error: ActionError, attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Drive one action through its retry policy.
///
/// `run` is invoked at most `max_attempts` times with the 1-indexed
/// attempt number. Cancellation during an attempt or during backoff
/// aborts with `RetryOutcome::Cancelled`, never a spurious failure.
pub async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    jitter: &dyn JitterSource,
    mut run: F,
) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<String, ActionError>>,
{
    let mut attempt: u32 = 1;
    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled { attempts: attempt - 1 };
        }

        match run(attempt).await {
            Ok(output) => return RetryOutcome::Success { output, attempts: attempt },
            Err(error) if error.is_cancelled() => {
                return RetryOutcome::Cancelled { attempts: attempt }
            }
            Err(error) => {
                if attempt >= policy.max_attempts {
                    return RetryOutcome::Failed { error, attempts: attempt };
                }
                let text = error.to_string();
                if !policy.should_retry(&text) {
                    tracing::debug!(attempt, error = %text, "failure not retryable");
                    return RetryOutcome::Failed { error, attempts: attempt };
                }

                let delay = policy.delay_after_attempt(attempt, jitter);
                tracing::debug!(attempt, ?delay, error = %text, "retrying after backoff");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return RetryOutcome::Cancelled { attempts: attempt };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            retry_on: Vec::new(),
        }
    }

    fn failure(text: &str) -> ActionError {
        ActionError::InvalidArgument {
            action: "t".into(),
            reason: text.into(),
        }
    }

    #[test]
    fn test_from_config_absent_is_single_attempt() {
        assert_eq!(RetryPolicy::from_config(None), RetryPolicy::single_attempt());
    }

    #[test]
    fn test_from_config_nonpositive_attempts_is_single_attempt() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert_eq!(
            RetryPolicy::from_config(Some(&config)),
            RetryPolicy::single_attempt()
        );

        let config = RetryConfig {
            max_attempts: -5,
            ..RetryConfig::default()
        };
        assert_eq!(
            RetryPolicy::from_config(Some(&config)),
            RetryPolicy::single_attempt()
        );
    }

    #[test]
    fn test_delay_progression_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            retry_on: Vec::new(),
        };
        let jitter = FixedJitter(0.0);
        assert_eq!(policy.delay_after_attempt(1, &jitter), Duration::from_secs(1));
        assert_eq!(policy.delay_after_attempt(2, &jitter), Duration::from_secs(2));
        assert_eq!(policy.delay_after_attempt(3, &jitter), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            retry_on: Vec::new(),
        };
        let jitter = FixedJitter(0.0);
        assert_eq!(policy.delay_after_attempt(9, &jitter), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_band_and_lower_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            retry_on: Vec::new(),
        };
        // +10 %
        assert_eq!(
            policy.delay_after_attempt(2, &FixedJitter(1.0)),
            Duration::from_secs_f64(2.2)
        );
        // -10 % on the first backoff would dip below initial_delay; clamped
        assert_eq!(
            policy.delay_after_attempt(1, &FixedJitter(-1.0)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_empty_retry_on_retries_anything() {
        assert!(policy(3).should_retry("total nonsense"));
    }

    #[test]
    fn test_predicates_filter_retries() {
        let mut p = policy(3);
        p.retry_on = vec![RetryPredicate::Timeout, RetryPredicate::Status(503)];
        assert!(p.should_retry("http request timeout after 5s"));
        assert!(p.should_retry("unexpected status code 503"));
        assert!(!p.should_retry("command failed with exit code 2"));
    }

    #[test]
    fn test_default_retryable_status_set() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(code));
        }
        assert!(!is_retryable_status(404));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let outcome = run_with_retry(
            &policy(3),
            &CancellationToken::new(),
            &FixedJitter(0.0),
            |_| async { Ok("done".to_string()) },
        )
        .await;
        match outcome {
            RetryOutcome::Success { output, attempts } => {
                assert_eq!(output, "done");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = run_with_retry(
            &policy(5),
            &CancellationToken::new(),
            &FixedJitter(0.0),
            move |_| {
                let calls = counter.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failure("transient"))
                    } else {
                        Ok("ok".to_string())
                    }
                }
            },
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::Success { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded_by_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = run_with_retry(
            &policy(3),
            &CancellationToken::new(),
            &FixedJitter(0.0),
            move |_| {
                let calls = counter.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(failure("always broken"))
                }
            },
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::Failed { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_returns_after_one_attempt() {
        let mut p = policy(3);
        p.retry_on = vec![RetryPredicate::Timeout];
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = run_with_retry(&p, &CancellationToken::new(), &FixedJitter(0.0), move |_| {
            let calls = counter.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ActionError::CommandFailed {
                    action: "t".into(),
                    code: 2,
                    output: String::new(),
                })
            }
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            trigger.cancel();
        });

        let mut p = policy(5);
        p.initial_delay = Duration::from_secs(3600);
        p.max_delay = Duration::from_secs(3600);

        let outcome = run_with_retry(&p, &cancel, &FixedJitter(0.0), |_| async {
            Err(failure("transient"))
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_attempt_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = run_with_retry(
            &policy(5),
            &CancellationToken::new(),
            &FixedJitter(0.0),
            move |_| {
                let calls = counter.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ActionError::Cancelled { action: "t".into() })
                }
            },
        )
        .await;
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
