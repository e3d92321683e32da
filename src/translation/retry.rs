/*!
 * Retry policy shared by translation and repair calls.
 *
 * One policy value describes the whole behaviour: how many attempts, how long
 * to wait between them, and what the caller gets when every attempt failed.
 */

use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::app_config::TranslationCommonConfig;

/// Attempt count and exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Add up to 25% random extra delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Result of running an operation under a policy
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: anyhow::Error },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The value, if any attempt succeeded
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Succeeded { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

impl RetryPolicy {
    /// Policy from the `translation.common` settings
    pub fn from_config(common: &TranslationCommonConfig) -> Self {
        Self {
            max_attempts: common.retry_count.max(1),
            base_backoff: Duration::from_millis(common.retry_backoff_ms),
            ..Self::default()
        }
    }

    /// Policy without waits, for tests and local mocks
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_backoff.saturating_mul(1u32 << exponent).min(self.max_backoff);
        if self.jitter && !delay.is_zero() {
            let extra = rand::rng().random_range(0.0..0.25);
            delay.mul_f64(1.0 + extra)
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds or attempts run out; `op` receives the attempt number
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return RetryOutcome::Succeeded { value, attempts: attempt },
                Err(error) if attempt >= self.max_attempts => {
                    warn!("{} failed after {} attempts: {}", label, attempt, error);
                    return RetryOutcome::Exhausted { attempts: attempt, last_error: error };
                }
                Err(error) => {
                    let delay = self.backoff_for(attempt);
                    warn!("{} attempt {}/{} failed: {} (retrying in {:?})", label, attempt, self.max_attempts, error, delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoffFor_shouldDoubleAndCap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: false,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_backoffFor_withJitter_shouldStayWithinQuarter() {
        let policy = RetryPolicy { base_backoff: Duration::from_millis(400), ..RetryPolicy::default() };
        for _ in 0..50 {
            let delay = policy.backoff_for(1);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_run_failingTwiceThenOk_shouldSucceedOnThird() {
        let calls = AtomicU32::new(0);
        let outcome = RetryPolicy::immediate(3).run("op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 { Err(anyhow!("boom")) } else { Ok(attempt) }
            }
        }).await;

        assert!(matches!(outcome, RetryOutcome::Succeeded { value: 3, attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_alwaysFailing_shouldStopAtMaxAttempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = RetryPolicy::immediate(3).run("op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("still broken")) }
        }).await;

        match outcome {
            RetryOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.to_string(), "still broken");
            }
            RetryOutcome::Succeeded { .. } => panic!("expected exhaustion"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fromConfig_shouldReadCommonSettings() {
        let common = TranslationCommonConfig { retry_count: 5, retry_backoff_ms: 10, ..Default::default() };
        let policy = RetryPolicy::from_config(&common);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_backoff, Duration::from_millis(10));
    }
}
