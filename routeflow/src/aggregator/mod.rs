//! Correlation-based aggregation.
//!
//! An [`Aggregator`] groups exchanges by a correlation key, merges each new
//! arrival into its group through an [`AggregationStrategy`], and emits the
//! merged exchange downstream when a completion condition holds:
//!
//! 1. the strategy flags the merged exchange with
//!    [`AGGREGATION_COMPLETE_CURRENT_GROUP`](crate::core::keys::AGGREGATION_COMPLETE_CURRENT_GROUP),
//! 2. the completion predicate matches,
//! 3. the group reaches the completion size,
//! 4. the group sits idle past its timeout (checked by a background sweeper).
//!
//! The first three are evaluated on every arrival in that order; timeouts only
//! fire from the sweeper, or from a forced completion at shutdown.

mod config;
mod correlation;
mod group;
mod processor;
mod strategy;

pub use config::AggregationConfig;
pub use correlation::{
    correlate_by_header, correlate_by_property, timeout_from_header, CompletionPredicate,
    CorrelationExpression, CorrelationKey, TimeoutExpression,
};
pub use group::{AggregationGroup, CompletedBy};
pub use processor::Aggregator;
pub use strategy::{
    AggregationStrategy, BodyConcatStrategy, CollectBodiesStrategy, FnAggregationStrategy,
    UseLatestStrategy,
};
