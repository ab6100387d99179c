//! Per-exchange redelivery bookkeeping.

use super::RedeliveryPolicy;
use crate::errors::ExchangeFailure;
use std::time::Duration;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Wait for the given delay, then redeliver.
    Redeliver(Duration),
    /// The redelivery budget is spent.
    Exhausted,
    /// The failure is not eligible for redelivery.
    NotRetryable,
}

/// Redelivery state owned by one exchange for the duration of one handler.
///
/// Created fresh for every exchange, so counters never leak between
/// exchanges.
#[derive(Debug, Clone)]
pub struct RedeliveryState {
    /// Redeliveries performed so far.
    pub attempt: u32,
    /// The failure that started recovery.
    pub original_failure: ExchangeFailure,
    /// Delay chosen for the most recent redelivery.
    pub next_delay: Duration,
}

impl RedeliveryState {
    /// Starts tracking recovery from `failure`.
    #[must_use]
    pub fn new(failure: ExchangeFailure) -> Self {
        Self {
            attempt: 0,
            original_failure: failure,
            next_delay: Duration::ZERO,
        }
    }

    /// Decides what to do about `current`, advancing the attempt counter
    /// when a redelivery is granted.
    pub fn decide(&mut self, policy: &RedeliveryPolicy, current: &ExchangeFailure) -> RedeliveryDecision {
        if !policy.is_retryable(current) {
            return RedeliveryDecision::NotRetryable;
        }
        if !policy.allows_redelivery(self.attempt) {
            return RedeliveryDecision::Exhausted;
        }

        self.attempt += 1;
        self.next_delay = policy.delay_for(self.attempt);
        RedeliveryDecision::Redeliver(self.next_delay)
    }
}
