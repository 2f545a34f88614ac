//! Retry policy with bounded backoff and fallback content.
//!
//! A stage invocation is attempted up to `max_attempts` times. Only
//! transient failures are retried; every other kind goes straight to the
//! fallback producer. Cancellation is never replaced by fallback content.

use crate::cancellation::CancellationToken;
use crate::errors::{ConfigError, StageError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Checks the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero attempts or a cap below the
    /// base delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms".to_string(),
                reason: format!("must not be below base_delay_ms ({})", self.base_delay_ms),
            });
        }
        Ok(())
    }

    /// Calculates the delay after the attempt with the given 0-based index.
    #[must_use]
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(attempt_index))
                .min(max),
            BackoffStrategy::Linear => base
                .saturating_mul(u64::from(attempt_index) + 1)
                .min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Attempts are exhausted.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

/// Per-invocation retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Attempts made so far.
    pub attempt: u32,
    /// Delays taken between attempts.
    pub delays: Vec<Duration>,
    /// The most recent failure.
    pub last_error: Option<StageError>,
}

impl RetryContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides what to do after the current attempt failed with `error`.
    ///
    /// Records the error and, on `Retry`, the delay about to be taken.
    pub fn decide(&mut self, config: &RetryConfig, error: &StageError) -> RetryDecision {
        self.last_error = Some(error.clone());

        if !error.is_retryable() {
            return RetryDecision::NotRetryable;
        }
        if self.attempt >= config.max_attempts.max(1) {
            return RetryDecision::GiveUp;
        }

        let delay = config.delay_for(self.attempt.saturating_sub(1));
        self.delays.push(delay);
        RetryDecision::Retry(delay)
    }
}

/// How a retried invocation was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// The primary action succeeded.
    Primary(T),
    /// The primary action failed and fallback content replaced it.
    Degraded {
        /// The fallback value.
        value: T,
        /// The failure that triggered the fallback.
        cause: StageError,
    },
    /// No value could be produced.
    Failed(StageError),
}

/// Result of [`RetryPolicy::run`].
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// The resolution.
    pub resolution: Resolution<T>,
    /// Attempts made of the primary action.
    pub attempts: u32,
    /// Delays taken between attempts.
    pub delays: Vec<Duration>,
}

impl<T> RetryOutcome<T> {
    /// Returns the delays in whole milliseconds.
    #[must_use]
    pub fn delays_ms(&self) -> Vec<u64> {
        self.delays
            .iter()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .collect()
    }
}

/// Wraps a single stage invocation with backoff and a fallback producer.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from a config.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `action` until it succeeds, fails non-transiently or runs out of
    /// attempts, then consults `fallback`.
    ///
    /// `action` receives the 1-based attempt number. Attempts and backoff
    /// sleeps are abandoned as soon as `token` fires; a `Cancelled` failure
    /// never reaches `fallback`.
    pub async fn run<T, F, Fut, B>(
        &self,
        token: &CancellationToken,
        mut action: F,
        fallback: B,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
        B: FnOnce(&StageError) -> Option<T>,
    {
        let mut ctx = RetryContext::new();

        let error = loop {
            if let Err(cancelled) = token.check() {
                break cancelled;
            }

            ctx.attempt += 1;
            let result = match token.run_until_cancelled(action(ctx.attempt)).await {
                Ok(result) => result,
                Err(cancelled) => Err(cancelled),
            };

            let err = match result {
                Ok(value) => {
                    return RetryOutcome {
                        resolution: Resolution::Primary(value),
                        attempts: ctx.attempt,
                        delays: ctx.delays,
                    };
                }
                Err(err) => err,
            };

            match ctx.decide(&self.config, &err) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        attempt = ctx.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient failure, retrying"
                    );
                    if let Err(cancelled) = token.sleep(delay).await {
                        break cancelled;
                    }
                }
                RetryDecision::GiveUp => {
                    debug!(attempts = ctx.attempt, error = %err, "retries exhausted");
                    break err;
                }
                RetryDecision::NotRetryable => break err,
            }
        };

        let resolution = if error.kind.allows_fallback() {
            match fallback(&error) {
                Some(value) => Resolution::Degraded {
                    value,
                    cause: error,
                },
                None => Resolution::Failed(error),
            }
        } else {
            Resolution::Failed(error)
        };

        RetryOutcome {
            resolution,
            attempts: ctx.attempt,
            delays: ctx.delays,
        }
    }
}
