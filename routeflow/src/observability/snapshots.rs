//! Point-in-time snapshots of engine state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Redelivery counters for one error handler scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeliverySnapshot {
    /// Current redelivery attempt per in-flight exchange id.
    pub in_flight: HashMap<String, u32>,
    /// Processing attempts, first deliveries included.
    pub total_attempts: u64,
    /// Redeliveries performed.
    pub total_redeliveries: u64,
    /// Exchanges that succeeded after at least one redelivery.
    pub recovered: u64,
    /// Exchanges delivered to a dead-letter destination.
    pub dead_lettered: u64,
    /// Exchanges returned failed with no dead-letter destination.
    pub exhausted: u64,
    /// Redelivery waits interrupted by shutdown.
    pub cancelled: u64,
}

/// State of one live aggregation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    /// Correlation key of the group.
    pub correlation_key: String,
    /// Number of exchanges merged so far.
    pub size: usize,
    /// Time since the group was opened.
    pub age_ms: u64,
    /// Time since the last exchange arrived.
    pub idle_ms: u64,
    /// Inactivity timeout applying to the group.
    pub timeout_ms: Option<u64>,
}

/// Aggregator counters and live groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorSnapshot {
    /// Live groups.
    pub groups: Vec<GroupSnapshot>,
    /// Strategy merge calls.
    pub merges: u64,
    /// Completed groups keyed by trigger (`size`, `timeout`, ...).
    pub completed: HashMap<String, u64>,
    /// Groups dropped at shutdown without being emitted.
    pub discarded: u64,
}

impl AggregatorSnapshot {
    /// Total number of completed groups.
    #[must_use]
    pub fn completed_total(&self) -> u64 {
        self.completed.values().sum()
    }
}
