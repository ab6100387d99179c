//! Engine configuration.
//!
//! Loaded from JSON. Every section falls back to defaults when omitted.

use crate::aggregator::AggregationConfig;
use crate::core::time::deserialize_opt_millis;
use crate::errorhandler::RedeliveryConfig;
use crate::errors::RouteflowError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default redelivery settings for error handlers.
    #[serde(default)]
    pub redelivery: RedeliveryConfig,

    /// Default aggregator settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Upper bound on blocking waits for async continuations.
    #[serde(default, deserialize_with = "deserialize_opt_millis")]
    pub sync_wait_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON and `Validation` for
    /// rejected values.
    pub fn from_json_str(json: &str) -> Result<Self, RouteflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RouteflowError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns the first rejected value.
    pub fn validate(&self) -> Result<(), RouteflowError> {
        self.redelivery.validate()?;
        self.aggregation.validate()?;
        if self.sync_wait_timeout_ms == Some(0) {
            return Err(RouteflowError::Config("sync_wait_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Returns the blocking wait bound.
    #[must_use]
    pub fn sync_wait_timeout(&self) -> Option<Duration> {
        self.sync_wait_timeout_ms.map(Duration::from_millis)
    }
}
