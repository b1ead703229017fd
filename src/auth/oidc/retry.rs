//! Exponential backoff for provider calls that are safe to repeat.

use std::time::Duration;
use tracing::{debug, warn};

// MARK: - Constants

/// Default total number of attempts, including the first.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default initial backoff duration (2 seconds).
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 2_000;

/// Default maximum backoff duration (30 seconds).
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default time allowed for a single attempt (2 seconds).
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 2_000;

// MARK: - Retry Policy

/// Policy for retrying failed requests with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Deadline of each individual attempt in milliseconds.
    pub attempt_timeout_ms: u64,
}

impl RetryPolicy {
    /// Policy used for RP-initiated logout: 5 attempts, 2s to 30s backoff, 2s per attempt.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_attempt_timeout(mut self, duration: Duration) -> Self {
        self.attempt_timeout_ms = duration.as_millis() as u64;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Backoff to wait after `failures` failed attempts (`failures >= 1`).
    pub fn calculate_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let backoff_ms = (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_backoff_ms as f64) as u64;

        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// MARK: - Retry Executor

/// Run `operation` until it succeeds or the policy's attempts are exhausted.
///
/// `operation` receives the zero-based attempt number. The last error is returned.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures = 0;

    loop {
        match operation(failures).await {
            Ok(result) => {
                if failures > 0 {
                    debug!(attempt = failures + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                failures += 1;

                if failures >= policy.max_attempts {
                    warn!(
                        attempts = failures,
                        error = %error,
                        "Giving up after final attempt"
                    );
                    return Err(error);
                }

                let backoff = policy.calculate_backoff(failures);
                warn!(
                    attempt = failures,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Request failed, retrying after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.attempt_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_backoff(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_backoff(3), Duration::from_secs(8));
        assert_eq!(policy.calculate_backoff(4), Duration::from_secs(16));
        assert_eq!(policy.calculate_backoff(5), Duration::from_secs(30));
        assert_eq!(policy.calculate_backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        assert_eq!(RetryPolicy::new().with_max_attempts(0).max_attempts, 1);
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = execute_with_retry(&fast_policy(), |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 { Err(format!("fail {attempt}")) } else { Ok("ok") }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = execute_with_retry(&fast_policy(), |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(format!("fail {attempt}"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "fail 4");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let result: Result<(), &str> =
            execute_with_retry(&RetryPolicy::new().with_max_attempts(3), |_| async { Err("down") })
                .await;

        assert!(result.is_err());
        // 2s after the first failure, 4s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }
}
