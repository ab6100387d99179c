//! Shared redelivery counters.

use crate::core::ExchangeId;
use crate::observability::RedeliverySnapshot;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every handler built from one error handler scope.
///
/// The in-flight map exposes the current attempt of each exchange that is
/// between redeliveries; an entry disappears once the exchange leaves the
/// handler.
#[derive(Debug, Default)]
pub struct RedeliveryMetrics {
    in_flight: DashMap<ExchangeId, u32>,
    attempts: AtomicU64,
    redeliveries: AtomicU64,
    recovered: AtomicU64,
    dead_lettered: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
}

impl RedeliveryMetrics {
    /// Creates empty counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current redelivery attempt of an in-flight exchange.
    #[must_use]
    pub fn attempt_of(&self, id: ExchangeId) -> Option<u32> {
        self.in_flight.get(&id).map(|entry| *entry.value())
    }

    /// Returns the number of exchanges currently being redelivered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns processing attempts, first deliveries included.
    #[must_use]
    pub fn total_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Returns redeliveries performed.
    #[must_use]
    pub fn total_redeliveries(&self) -> u64 {
        self.redeliveries.load(Ordering::Relaxed)
    }

    /// Returns exchanges delivered to a dead-letter destination.
    #[must_use]
    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Returns exchanges given back to the caller still failed.
    #[must_use]
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RedeliverySnapshot {
        RedeliverySnapshot {
            in_flight: self
                .in_flight
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            total_attempts: self.total_attempts(),
            total_redeliveries: self.total_redeliveries(),
            recovered: self.recovered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered(),
            exhausted: self.exhausted(),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a guard that keeps `id` in the in-flight map until dropped.
    pub(crate) fn in_flight_guard(&self, id: ExchangeId) -> InFlight<'_> {
        InFlight { metrics: self, id }
    }

    pub(crate) fn record_redelivery(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self) {
        self.recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-flight entry of one exchange.
///
/// Dropping the guard removes the entry, including when the continuation
/// owning it is dropped mid-wait.
#[derive(Debug)]
pub(crate) struct InFlight<'a> {
    metrics: &'a RedeliveryMetrics,
    id: ExchangeId,
}

impl InFlight<'_> {
    pub(crate) fn track(&self, attempt: u32) {
        self.metrics.in_flight.insert(self.id, attempt);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_and_snapshot() {
        let metrics = RedeliveryMetrics::new();
        let id = ExchangeId::next();

        metrics.record_attempt();
        let guard = metrics.in_flight_guard(id);
        guard.track(1);
        metrics.record_redelivery();
        assert_eq!(metrics.attempt_of(id), Some(1));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight.get(&id.to_string()), Some(&1));
        assert_eq!(snapshot.total_attempts, 2);
        assert_eq!(snapshot.total_redeliveries, 1);

        drop(guard);
        metrics.record_recovered();
        assert_eq!(metrics.attempt_of(id), None);
        assert_eq!(metrics.snapshot().recovered, 1);
    }
}
