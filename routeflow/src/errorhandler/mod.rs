//! Error handling with redelivery, backoff and dead-letter delivery.
//!
//! An [`ErrorHandler`] wraps a single pipeline step. When the step leaves a
//! failure on the exchange, the handler consults its [`RedeliveryPolicy`],
//! waits for the computed backoff and re-invokes the step. Once redeliveries
//! are exhausted the exchange goes to the dead-letter destination, or back to
//! the caller still failed when none is configured.
//!
//! Handlers are produced per step by an [`ErrorHandlerBuilder`], which the
//! pipeline builder resolves for each region of a route.

mod handler;
mod metrics;
mod policy;
mod state;

pub use handler::{ErrorHandler, ErrorHandlerBuilder};
pub use metrics::RedeliveryMetrics;
pub use policy::{JitterStrategy, RedeliveryConfig, RedeliveryPolicy, RetryPredicate, UNBOUNDED};
pub use state::{RedeliveryDecision, RedeliveryState};
