//! Retry and backoff for control-plane sensitive operations
//!
//! Certificate issuance talks to the vendor control plane over a long-lived
//! connection that drops around host sleep/wake. The provisioner itself never
//! loops; callers that want resilience wrap attempts in [`retry_async`] with a
//! classifier that only retries failures diagnosed as transient.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Jitter strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Random delay between 0 and the computed delay
    #[default]
    FullJitter,
    /// Half the computed delay plus a random half
    EqualJitter,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter strategy to apply
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Backoff tuned for certificate issuance: a reconnecting control plane
    /// needs seconds, not milliseconds.
    pub fn for_certificates(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::EqualJitter,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.jittered(self.capped_delay(attempt), &mut fastrand::Rng::new())
    }

    fn capped_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .as_millis()
            .saturating_mul(2_u128.saturating_pow(attempt));
        let capped = exponential.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration, rng: &mut fastrand::Rng) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let jitter_ms = match self.jitter {
            JitterStrategy::FullJitter => rng.u64(0..=delay_ms),
            JitterStrategy::EqualJitter => {
                let half = delay_ms / 2;
                half + rng.u64(0..=half)
            }
        };
        Duration::from_millis(jitter_ms)
    }
}

/// Outcome of classifying a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Do not retry (terminal error)
    Stop,
}

/// Retry an async operation with exponential backoff and jitter
///
/// `classify` sees every failure; [`RetryDecision::Stop`] returns it
/// immediately. When attempts run out the last failure is returned.
#[instrument(level = "debug", skip(operation, classify))]
pub async fn retry_async<T, E, Fut, Op, C>(
    config: &RetryConfig,
    operation: Op,
    classify: C,
) -> std::result::Result<T, E>
where
    Op: Fn(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: std::fmt::Debug,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Operation succeeded on attempt {}", attempt + 1);
                }
                return Ok(value);
            }
            Err(error) => {
                if classify(&error) == RetryDecision::Stop {
                    debug!("Failure classified as permanent, not retrying: {:?}", error);
                    return Err(error);
                }
                if attempt >= config.max_attempts {
                    warn!(
                        "All {} attempts exhausted, final failure: {:?}",
                        attempt + 1,
                        error
                    );
                    return Err(error);
                }
                let delay = config.calculate_delay(attempt);
                debug!(
                    "Attempt {} failed transiently, retrying in {:?}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
