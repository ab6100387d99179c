//! Well-known exchange property and header names.

/// Property: number of exchanges merged into an aggregated exchange.
pub const AGGREGATED_SIZE: &str = "RouteflowAggregatedSize";

/// Property: which trigger completed an aggregation group.
pub const AGGREGATED_COMPLETED_BY: &str = "RouteflowAggregatedCompletedBy";

/// Property: correlation key of an aggregated exchange.
pub const AGGREGATED_CORRELATION_KEY: &str = "RouteflowAggregatedCorrelationKey";

/// Property: set by an aggregation strategy to complete the current group.
///
/// Removed from the merged exchange before it is emitted.
pub const AGGREGATION_COMPLETE_CURRENT_GROUP: &str = "RouteflowAggregationCompleteCurrentGroup";

/// Property: true once a dead-letter destination handled the exchange.
pub const FAILURE_HANDLED: &str = "RouteflowFailureHandled";

/// Property: name of the processor where the exchange failed.
pub const FAILURE_ENDPOINT: &str = "RouteflowFailureEndpoint";

/// Property: id of the pipeline step currently processing the exchange.
pub const STEP_ID: &str = "RouteflowStepId";

/// Header: true when the exchange is being redelivered.
pub const REDELIVERED: &str = "RouteflowRedelivered";

/// Header: current redelivery attempt (1-based).
pub const REDELIVERY_COUNTER: &str = "RouteflowRedeliveryCounter";

/// Header: maximum redeliveries allowed for this exchange.
pub const REDELIVERY_MAX_COUNTER: &str = "RouteflowRedeliveryMaxCounter";
