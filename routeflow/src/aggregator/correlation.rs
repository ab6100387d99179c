//! Correlation keys and the expressions that compute them.

use crate::core::{parse_time_pattern, Exchange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifies the group an exchange belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Creates a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives a key from a header or property value. `null` has no key.
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Self(s.clone())),
            other => Some(Self(other.to_string())),
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Computes the correlation key of an exchange. `None` marks it invalid.
pub type CorrelationExpression = Arc<dyn Fn(&Exchange) -> Option<CorrelationKey> + Send + Sync>;

/// Computes a per-exchange inactivity timeout for its group.
pub type TimeoutExpression = Arc<dyn Fn(&Exchange) -> Option<Duration> + Send + Sync>;

/// Decides whether a merged exchange completes its group.
pub type CompletionPredicate = Arc<dyn Fn(&Exchange) -> bool + Send + Sync>;

/// Correlates by the value of a request header.
#[must_use]
pub fn correlate_by_header(name: impl Into<String>) -> CorrelationExpression {
    let name = name.into();
    Arc::new(move |exchange: &Exchange| exchange.header(&name).and_then(CorrelationKey::from_value))
}

/// Correlates by the value of an exchange property.
#[must_use]
pub fn correlate_by_property(name: impl Into<String>) -> CorrelationExpression {
    let name = name.into();
    Arc::new(move |exchange: &Exchange| exchange.property(&name).and_then(CorrelationKey::from_value))
}

/// Reads a timeout from a request header.
///
/// Numbers are milliseconds. Strings are time patterns (`"250"`, `"5s"`,
/// `"1m30s"`). Anything else yields no timeout.
#[must_use]
pub fn timeout_from_header(name: impl Into<String>) -> TimeoutExpression {
    let name = name.into();
    Arc::new(move |exchange: &Exchange| match exchange.header(&name)? {
        serde_json::Value::Number(n) => n.as_u64().map(Duration::from_millis),
        serde_json::Value::String(s) => parse_time_pattern(s).ok(),
        _ => None,
    })
}
