//! # Routeflow
//!
//! An in-process message mediation and routing engine.
//!
//! Routeflow moves [`Exchange`](core::Exchange)s through pipelines of
//! processors, with support for:
//!
//! - **Sync or async processors**: a processor either finishes inline or
//!   hands back a continuation; pipelines switch modes per step
//! - **Error handling**: redelivery with backoff, dead-letter destinations
//!   and per-region error handler inheritance
//! - **Aggregation**: correlation groups completed by size, predicate,
//!   strategy signal or inactivity timeout
//! - **Cancellation**: route shutdown interrupts redelivery waits and stops
//!   timeout sweepers
//! - **Event-driven observability**: step, redelivery and aggregation events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use routeflow::prelude::*;
//!
//! let dead = Arc::new(MockProcessor::new("dead"));
//! let route = Route::new(
//!     "orders",
//!     PipelineBuilder::new("orders")
//!         .error_handler(ErrorHandlerBuilder::dead_letter_channel(dead).with_maximum_redeliveries(3))
//!         .to(Arc::new(validate))
//!         .to(Arc::new(enrich))
//!         .disabled()
//!         .to(Arc::new(store)),
//! )?;
//!
//! let exchange = route.send(Exchange::with_body("order-1")).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errorhandler;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregator::{
        correlate_by_header, correlate_by_property, timeout_from_header, AggregationConfig,
        AggregationStrategy, Aggregator, BodyConcatStrategy, CollectBodiesStrategy, CompletedBy,
        CorrelationKey, FnAggregationStrategy, UseLatestStrategy,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EngineConfig;
    pub use crate::core::{keys, Body, Exchange, ExchangeId, ExchangePattern, Headers, Message};
    pub use crate::errorhandler::{
        ErrorHandler, ErrorHandlerBuilder, JitterStrategy, RedeliveryConfig, RedeliveryPolicy,
    };
    pub use crate::errors::{ExchangeFailure, FailureKind, RouteValidationError, RouteflowError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{AggregatorSnapshot, GroupSnapshot, RedeliverySnapshot};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, Route, Step};
    pub use crate::processor::{
        process_blocking, AsyncFnProcessor, Completion, FnProcessor, LogProcessor, Processor,
        SetBodyProcessor, SetHeaderProcessor, SynchronousProcessor,
    };
    pub use crate::testing::MockProcessor;
    pub use std::sync::Arc;
}

/// Version of the routeflow crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
