//! Exponential backoff with jitter.
//!
//! [`BackoffConfig`] computes per-attempt delays for the reconciliation work
//! queue, and [`retry_with_backoff`] wraps one-shot startup operations (CRD
//! installation) that may fail transiently.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Exponential backoff policy
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Maximum number of attempts for [`retry_with_backoff`] (0 = infinite)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub backoff_multiplier: f64,
    /// Randomize each delay to 0.5x..1.5x of its nominal value
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Nominal delay before retry number `failures` (1-based), capped at `max_delay`
    pub fn nominal_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry number `failures`, with jitter applied when enabled
    ///
    /// The jittered value never exceeds `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let nominal = self.nominal_delay(failures);
        if !self.jitter {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64((nominal.as_secs_f64() * factor).min(self.max_delay.as_secs_f64()))
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until success, or until `max_attempts` is exhausted when set, in
/// which case the last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &BackoffConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn delays_grow_exponentially_until_capped() {
        let config = no_jitter();
        assert_eq!(config.delay_for(1), Duration::from_millis(5));
        assert_eq!(config.delay_for(2), Duration::from_millis(10));
        assert_eq!(config.delay_for(3), Duration::from_millis(20));
        assert_eq!(config.delay_for(4), Duration::from_millis(40));
        assert_eq!(config.delay_for(5), Duration::from_millis(40));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(40));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        for failures in 1..20 {
            let delay = config.delay_for(failures);
            assert!(delay <= Duration::from_secs(1));
            assert!(delay >= config.nominal_delay(failures) / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<u32, String> = retry_with_backoff(&no_jitter(), "flaky", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = BackoffConfig {
            max_attempts: 2,
            ..no_jitter()
        };

        let result: Result<(), &str> = retry_with_backoff(&config, "always-fails", || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
