//! Redelivery policy: how many times, how long to wait, and for what.

use crate::core::time::{deserialize_millis, deserialize_opt_millis};
use crate::errors::{ExchangeFailure, FailureKind, RouteValidationError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a failure may be redelivered.
pub type RetryPredicate = Arc<dyn Fn(&ExchangeFailure) -> bool + Send + Sync>;

/// Sentinel for unbounded redeliveries.
pub const UNBOUNDED: i32 = -1;

/// Jitter applied to a computed delay, after the cap.
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

impl JitterStrategy {
    fn apply(self, delay: Duration) -> Duration {
        match self {
            Self::None => delay,
            Self::Full => random_up_to(delay),
            Self::Equal => {
                let half = delay / 2;
                half + random_up_to(delay - half)
            }
        }
    }
}

fn random_up_to(bound: Duration) -> Duration {
    let nanos = u64::try_from(bound.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
}

/// Serializable redelivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeliveryConfig {
    /// Redeliveries after the first attempt. `-1` means unbounded.
    #[serde(default)]
    pub maximum_redeliveries: i32,

    /// Delay before the first redelivery. Accepts a time pattern.
    #[serde(default = "default_initial_delay_ms", deserialize_with = "deserialize_millis")]
    pub initial_delay_ms: u64,

    /// Growth factor applied per attempt. Absent means a fixed delay.
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,

    /// Upper bound on any computed delay. Accepts a time pattern.
    #[serde(default, deserialize_with = "deserialize_opt_millis")]
    pub maximum_delay_ms: Option<u64>,

    /// Jitter applied after the cap.
    #[serde(default)]
    pub jitter: JitterStrategy,

    /// Also redeliver structural failures.
    #[serde(default)]
    pub retry_structural: bool,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            maximum_redeliveries: 0,
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: None,
            maximum_delay_ms: None,
            jitter: JitterStrategy::None,
            retry_structural: false,
        }
    }
}

impl RedeliveryConfig {
    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Rejects redelivery counts below `-1` and multipliers that are not
    /// finite or below 1.
    pub fn validate(&self) -> Result<(), RouteValidationError> {
        if self.maximum_redeliveries < UNBOUNDED {
            return Err(RouteValidationError::new(
                "maximum_redeliveries must be -1 (unbounded) or a non-negative count",
            )
            .with_context_entry("maximum_redeliveries", self.maximum_redeliveries.to_string()));
        }
        if let Some(multiplier) = self.backoff_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(RouteValidationError::new("backoff_multiplier must be a finite value >= 1")
                    .with_context_entry("backoff_multiplier", multiplier.to_string()));
            }
        }
        Ok(())
    }

    /// Builds a policy from these settings.
    ///
    /// # Errors
    ///
    /// Returns the validation error when the settings are invalid.
    pub fn into_policy(self) -> Result<RedeliveryPolicy, RouteValidationError> {
        self.validate()?;
        Ok(RedeliveryPolicy {
            maximum_delay: self.maximum_delay_ms.map(Duration::from_millis),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            config: self,
            retryable: None,
        })
    }
}

/// Redelivery policy applied by an error handler.
#[derive(Clone)]
pub struct RedeliveryPolicy {
    config: RedeliveryConfig,
    initial_delay: Duration,
    maximum_delay: Option<Duration>,
    retryable: Option<RetryPredicate>,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            config: RedeliveryConfig::default(),
            initial_delay: Duration::from_millis(default_initial_delay_ms()),
            maximum_delay: None,
            retryable: None,
        }
    }
}

impl fmt::Debug for RedeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeliveryPolicy")
            .field("maximum_redeliveries", &self.config.maximum_redeliveries)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.config.backoff_multiplier)
            .field("maximum_delay", &self.maximum_delay)
            .field("jitter", &self.config.jitter)
            .field("custom_predicate", &self.retryable.is_some())
            .finish()
    }
}

impl RedeliveryPolicy {
    /// Creates a policy with no redeliveries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum redeliveries.
    ///
    /// Only `-1` means unbounded. Any other negative value allows no
    /// redelivery and is rejected by [`RedeliveryPolicy::validate`].
    #[must_use]
    pub fn with_maximum_redeliveries(mut self, maximum: i32) -> Self {
        self.config.maximum_redeliveries = maximum;
        self
    }

    /// Redelivers until success or shutdown.
    #[must_use]
    pub fn unbounded(self) -> Self {
        self.with_maximum_redeliveries(UNBOUNDED)
    }

    /// Sets the delay before the first redelivery.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.config.initial_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the backoff multiplier. Values below 1 are treated as 1.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 };
        self.config.backoff_multiplier = Some(multiplier);
        self
    }

    /// Caps every computed delay.
    #[must_use]
    pub fn with_maximum_delay(mut self, delay: Duration) -> Self {
        self.maximum_delay = Some(delay);
        self.config.maximum_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Also redeliver structural failures under the default predicate.
    #[must_use]
    pub fn with_retry_structural(mut self, retry: bool) -> Self {
        self.config.retry_structural = retry;
        self
    }

    /// Replaces the retryable predicate.
    #[must_use]
    pub fn retry_while<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExchangeFailure) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    /// Returns the configured maximum, `-1` when unbounded.
    #[must_use]
    pub fn maximum_redeliveries(&self) -> i32 {
        self.config.maximum_redeliveries
    }

    /// Returns true when redeliveries are unbounded.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.config.maximum_redeliveries == UNBOUNDED
    }

    /// Returns the settings this policy was built from.
    #[must_use]
    pub fn config(&self) -> &RedeliveryConfig {
        &self.config
    }

    /// Checks the settings this policy carries.
    ///
    /// # Errors
    ///
    /// Same rules as [`RedeliveryConfig::validate`].
    pub fn validate(&self) -> Result<(), RouteValidationError> {
        self.config.validate()
    }

    /// Returns true if another redelivery is allowed after `performed`.
    #[must_use]
    pub fn allows_redelivery(&self, performed: u32) -> bool {
        self.is_unbounded() || i64::from(performed) < i64::from(self.config.maximum_redeliveries)
    }

    /// Returns true if `failure` may be redelivered.
    #[must_use]
    pub fn is_retryable(&self, failure: &ExchangeFailure) -> bool {
        match &self.retryable {
            Some(predicate) => predicate(failure),
            None => {
                failure.kind.is_retryable_by_default()
                    || (self.config.retry_structural && failure.kind == FailureKind::Structural)
            }
        }
    }

    /// Computes the wait before redelivery `attempt` (1-based).
    ///
    /// `initial × multiplier^(attempt−1)`, capped, then jittered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.config.backoff_multiplier.map_or(1.0, |m| m.powi(exponent));

        let delay = Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        let capped = self.maximum_delay.map_or(delay, |max| delay.min(max));

        self.config.jitter.apply(capped)
    }
}
