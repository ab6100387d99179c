//! Aggregator settings.

use crate::core::time::{deserialize_millis, deserialize_opt_millis};
use crate::errors::RouteValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serializable aggregator settings.
///
/// Closures (predicate, per-exchange timeout) are attached on the
/// [`Aggregator`](super::Aggregator) itself. Millisecond fields also accept
/// time patterns such as `"5s"` or `"1m30s"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Complete a group once it holds this many exchanges.
    #[serde(default)]
    pub completion_size: Option<usize>,

    /// Complete a group after this much inactivity.
    #[serde(default, deserialize_with = "deserialize_opt_millis")]
    pub completion_timeout_ms: Option<u64>,

    /// How often the sweeper looks for timed-out groups.
    #[serde(default = "default_checker_interval_ms", deserialize_with = "deserialize_millis")]
    pub completion_timeout_checker_interval_ms: u64,

    /// Pass exchanges without a correlation key through instead of failing
    /// them.
    #[serde(default)]
    pub ignore_invalid_correlation_keys: bool,

    /// Emit open groups at shutdown instead of discarding them.
    #[serde(default)]
    pub force_completion_on_stop: bool,
}

fn default_checker_interval_ms() -> u64 {
    1000
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            completion_size: None,
            completion_timeout_ms: None,
            completion_timeout_checker_interval_ms: default_checker_interval_ms(),
            ignore_invalid_correlation_keys: false,
            force_completion_on_stop: false,
        }
    }
}

impl AggregationConfig {
    /// Returns the inactivity timeout.
    #[must_use]
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the sweeper interval.
    #[must_use]
    pub fn checker_interval(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_checker_interval_ms)
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Rejects a zero completion size, a zero timeout or a zero checker
    /// interval.
    pub fn validate(&self) -> Result<(), RouteValidationError> {
        if self.completion_size == Some(0) {
            return Err(RouteValidationError::new("completion_size must be at least 1"));
        }
        if self.completion_timeout_ms == Some(0) {
            return Err(RouteValidationError::new("completion_timeout_ms must be positive"));
        }
        if self.completion_timeout_checker_interval_ms == 0 {
            return Err(RouteValidationError::new(
                "completion_timeout_checker_interval_ms must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: AggregationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AggregationConfig::default());
        assert_eq!(config.checker_interval(), Duration::from_secs(1));
        assert!(config.completion_timeout().is_none());
    }

    #[test]
    fn test_time_patterns_in_json() {
        let config: AggregationConfig = serde_json::from_str(
            r#"{"completion_timeout_ms": "1m30s", "completion_timeout_checker_interval_ms": "250ms"}"#,
        )
        .unwrap();
        assert_eq!(config.completion_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.checker_interval(), Duration::from_millis(250));

        let config: AggregationConfig = serde_json::from_str(r#"{"completion_timeout_ms": null}"#).unwrap();
        assert!(config.completion_timeout().is_none());

        assert!(serde_json::from_str::<AggregationConfig>(r#"{"completion_timeout_ms": "soon"}"#).is_err());
    }

    #[test]
    fn test_validation() {
        let config = AggregationConfig {
            completion_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AggregationConfig {
            completion_timeout_checker_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AggregationConfig {
            completion_size: Some(3),
            completion_timeout_ms: Some(1000),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
