//! Observability utilities.
//!
//! Read-only snapshots of redelivery and aggregation state, for a separate
//! monitoring collaborator to expose however it likes.

mod snapshots;
mod timer;

pub use snapshots::{AggregatorSnapshot, GroupSnapshot, RedeliverySnapshot};
pub use timer::SpanTimer;
