//! The processor capability and the async continuation model.
//!
//! Every pipeline stage, error handler, aggregator, dead-letter destination
//! and test fixture implements [`Processor`]. A processor takes ownership of
//! an exchange and hands it back through a [`Completion`]: either already
//! finished (`Sync`) or as a continuation to be awaited (`Async`).

mod completion;
mod functions;
mod sync;

pub use completion::{Completion, ExchangeFuture};
pub use functions::{AsyncFnProcessor, FnProcessor, LogProcessor, SetBodyProcessor, SetHeaderProcessor};
pub use sync::{process_blocking, SynchronousProcessor};

use crate::core::Exchange;
use std::fmt::Debug;
use std::sync::Arc;

/// The single processing capability of the engine.
///
/// Implementations must not hold on to the exchange after completing; the
/// exchange returned through the completion is the only live instance.
pub trait Processor: Send + Sync + Debug {
    /// Returns the name of the processor.
    fn name(&self) -> &str;

    /// Processes an exchange.
    ///
    /// Return [`Completion::Sync`] when the work finished before returning,
    /// or [`Completion::Async`] with a continuation otherwise.
    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a>;
}

impl<P: Processor + ?Sized> Processor for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        (**self).process(exchange)
    }
}
