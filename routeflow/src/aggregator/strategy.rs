//! Aggregation strategies.

use crate::core::Exchange;
use std::fmt;

/// Merges an incoming exchange into the accumulated one.
///
/// `existing` is `None` for the first exchange of a group. A strategy may
/// complete the group early by setting the
/// [`AGGREGATION_COMPLETE_CURRENT_GROUP`](crate::core::keys::AGGREGATION_COMPLETE_CURRENT_GROUP)
/// property on the exchange it returns.
pub trait AggregationStrategy: Send + Sync + fmt::Debug {
    /// Returns the merged exchange.
    fn aggregate(&self, existing: Option<Exchange>, incoming: Exchange) -> Exchange;
}

/// Joins text bodies with a separator.
#[derive(Debug, Clone)]
pub struct BodyConcatStrategy {
    separator: String,
}

impl BodyConcatStrategy {
    /// Creates a strategy joining with `separator`.
    #[must_use]
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Default for BodyConcatStrategy {
    fn default() -> Self {
        Self::new("+")
    }
}

impl AggregationStrategy for BodyConcatStrategy {
    fn aggregate(&self, existing: Option<Exchange>, incoming: Exchange) -> Exchange {
        let Some(mut existing) = existing else {
            return incoming;
        };
        let joined = format!(
            "{}{}{}",
            existing.body_string().unwrap_or_default(),
            self.separator,
            incoming.body_string().unwrap_or_default()
        );
        existing.set_body(joined);
        existing
    }
}

/// Collects every body into a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectBodiesStrategy;

impl AggregationStrategy for CollectBodiesStrategy {
    fn aggregate(&self, existing: Option<Exchange>, incoming: Exchange) -> Exchange {
        let item = incoming.body().to_json().unwrap_or(serde_json::Value::Null);
        let Some(mut existing) = existing else {
            let mut first = incoming;
            first.set_body(serde_json::Value::Array(vec![item]));
            return first;
        };

        let mut items = match existing.body_as::<serde_json::Value>() {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        items.push(item);
        existing.set_body(serde_json::Value::Array(items));
        existing
    }
}

/// Keeps only the most recent exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct UseLatestStrategy;

impl AggregationStrategy for UseLatestStrategy {
    fn aggregate(&self, _existing: Option<Exchange>, incoming: Exchange) -> Exchange {
        incoming
    }
}

/// A strategy backed by a closure.
pub struct FnAggregationStrategy<F>
where
    F: Fn(Option<Exchange>, Exchange) -> Exchange + Send + Sync,
{
    func: F,
}

impl<F> FnAggregationStrategy<F>
where
    F: Fn(Option<Exchange>, Exchange) -> Exchange + Send + Sync,
{
    /// Creates a closure strategy.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnAggregationStrategy<F>
where
    F: Fn(Option<Exchange>, Exchange) -> Exchange + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAggregationStrategy").finish_non_exhaustive()
    }
}

impl<F> AggregationStrategy for FnAggregationStrategy<F>
where
    F: Fn(Option<Exchange>, Exchange) -> Exchange + Send + Sync,
{
    fn aggregate(&self, existing: Option<Exchange>, incoming: Exchange) -> Exchange {
        (self.func)(existing, incoming)
    }
}
