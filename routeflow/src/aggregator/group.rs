//! Aggregation groups.

use super::CorrelationKey;
use crate::core::Exchange;
use crate::observability::GroupSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// The trigger that completed a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedBy {
    /// The strategy flagged the merged exchange.
    Strategy,
    /// The completion predicate matched.
    Predicate,
    /// The group reached the completion size.
    Size,
    /// The group sat idle past its timeout.
    Timeout,
    /// Completed at shutdown.
    Force,
}

impl CompletedBy {
    /// Returns the label stored on completed exchanges.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strategy => "strategy",
            Self::Predicate => "predicate",
            Self::Size => "size",
            Self::Timeout => "timeout",
            Self::Force => "force",
        }
    }
}

impl fmt::Display for CompletedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated state for one correlation key.
#[derive(Debug, Clone)]
pub struct AggregationGroup {
    key: CorrelationKey,
    exchange: Option<Exchange>,
    size: usize,
    created: Instant,
    last_updated: Instant,
    timeout: Option<Duration>,
}

impl AggregationGroup {
    /// Opens an empty group.
    #[must_use]
    pub fn new(key: CorrelationKey, timeout: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            key,
            exchange: None,
            size: 0,
            created: now,
            last_updated: now,
            timeout,
        }
    }

    /// Returns the correlation key.
    #[must_use]
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Returns the number of merged exchanges.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the accumulated exchange.
    #[must_use]
    pub fn exchange(&self) -> Option<&Exchange> {
        self.exchange.as_ref()
    }

    /// Returns the inactivity timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn take_exchange(&mut self) -> Option<Exchange> {
        self.exchange.take()
    }

    /// Stores a merge result. A timeout computed from the latest arrival
    /// replaces the previous one.
    pub(crate) fn record(&mut self, merged: Exchange, timeout: Option<Duration>) {
        self.exchange = Some(merged);
        self.size += 1;
        self.last_updated = Instant::now();
        if timeout.is_some() {
            self.timeout = timeout;
        }
    }

    /// Returns true if the group has been idle past its timeout at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| now.saturating_duration_since(self.last_updated) >= timeout)
    }

    /// Describes the group at `now`.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> GroupSnapshot {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        GroupSnapshot {
            correlation_key: self.key.to_string(),
            size: self.size,
            age_ms: millis(now.saturating_duration_since(self.created)),
            idle_ms: millis(now.saturating_duration_since(self.last_updated)),
            timeout_ms: self.timeout.map(millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_expiry() {
        let mut group = AggregationGroup::new(CorrelationKey::from("k"), Some(Duration::from_millis(100)));
        group.record(Exchange::with_body("A"), None);
        assert_eq!(group.size(), 1);

        let now = Instant::now();
        assert!(!group.is_expired(now));
        assert!(group.is_expired(now + Duration::from_millis(150)));

        let snapshot = group.snapshot(now + Duration::from_millis(150));
        assert_eq!(snapshot.size, 1);
        assert_eq!(snapshot.timeout_ms, Some(100));
        assert!(snapshot.idle_ms >= 150);
    }

    #[test]
    fn test_without_timeout_never_expires() {
        let mut group = AggregationGroup::new(CorrelationKey::from("k"), None);
        group.record(Exchange::with_body("A"), None);
        assert!(!group.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_latest_timeout_wins() {
        let mut group = AggregationGroup::new(CorrelationKey::from("k"), Some(Duration::from_secs(3)));
        group.record(Exchange::with_body("A"), Some(Duration::from_millis(500)));
        assert_eq!(group.timeout(), Some(Duration::from_millis(500)));
        assert_eq!(CompletedBy::Timeout.to_string(), "timeout");
    }
}
