//! Error types for the routeflow engine.
//!
//! Two families live here. `RouteflowError` is returned by fallible engine
//! operations (building routes, loading configuration, blocking waits).
//! `ExchangeFailure` is a value captured *on* an exchange when a processor
//! could not complete its unit of work; it travels with the exchange instead
//! of unwinding through the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for routeflow operations.
#[derive(Debug, Error)]
pub enum RouteflowError {
    /// A route or pipeline failed validation.
    #[error("{0}")]
    Validation(#[from] RouteValidationError),

    /// A configuration value was rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A blocking wait on an asynchronous continuation timed out.
    #[error("Timed out after {timeout_ms}ms waiting for exchange {exchange_id}")]
    SyncWaitTimeout {
        /// The exchange being waited on.
        exchange_id: String,
        /// The configured wait in milliseconds.
        timeout_ms: u64,
    },

    /// The route was shut down while work was in flight.
    #[error("Route '{0}' is shut down")]
    ShutDown(String),

    /// A runtime could not be obtained to drive a continuation.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when a route definition is rejected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RouteValidationError {
    /// The error message.
    pub message: String,
    /// The route involved.
    pub route: Option<String>,
    /// Additional context key-value pairs.
    pub context: HashMap<String, String>,
}

impl RouteValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            route: None,
            context: HashMap::new(),
        }
    }

    /// Sets the route the error refers to.
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Classification of a failure captured on an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A processor could not complete its unit of work.
    Business,
    /// Malformed or missing required input to a stage.
    Structural,
    /// Timeouts, unreachable collaborators.
    Infrastructure,
    /// The enclosing route was shut down while the exchange was in flight.
    Cancelled,
}

impl FailureKind {
    /// Whether failures of this kind are redelivered when no predicate is configured.
    #[must_use]
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, Self::Business | Self::Infrastructure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Business => write!(f, "business"),
            Self::Structural => write!(f, "structural"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A failure captured on an exchange.
///
/// `handled` is set once a dead-letter destination has taken responsibility
/// for the exchange; the failure itself stays attached so callers still see it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure{}: {message}", .processor.as_ref().map(|p| format!(" in '{p}'")).unwrap_or_default())]
pub struct ExchangeFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human readable message.
    pub message: String,
    /// Name of the processor that raised the failure, if known.
    pub processor: Option<String>,
    /// Whether a dead-letter destination has handled this failure.
    #[serde(default)]
    pub handled: bool,
}

impl ExchangeFailure {
    /// Creates a new failure of the given kind.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            processor: None,
            handled: false,
        }
    }

    /// Creates a business failure.
    #[must_use]
    pub fn business(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Business, message)
    }

    /// Creates a structural failure.
    #[must_use]
    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Structural, message)
    }

    /// Creates an infrastructure failure.
    #[must_use]
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Infrastructure, message)
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    /// Records the processor that raised the failure.
    #[must_use]
    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    /// Returns true if this failure and `other` describe the same failure,
    /// ignoring the handled flag.
    #[must_use]
    pub fn same_failure(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.processor == other.processor
    }
}
