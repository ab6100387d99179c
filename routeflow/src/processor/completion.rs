//! Synchronous or asynchronous completion of a processor invocation.

use crate::core::Exchange;
use futures::future::BoxFuture;
use std::fmt;
use std::future::{Future, IntoFuture};

/// A boxed continuation resolving to the processed exchange.
pub type ExchangeFuture<'a> = BoxFuture<'a, Exchange>;

/// Outcome of invoking a processor.
///
/// Awaiting a completion yields the exchange in both cases, so callers that
/// can suspend never need to distinguish them.
#[must_use = "a completion carries the exchange and must be awaited or unwrapped"]
pub enum Completion<'a> {
    /// The processor finished before returning.
    Sync(Exchange),
    /// The processor will finish when the continuation resolves.
    Async(ExchangeFuture<'a>),
}

impl<'a> Completion<'a> {
    /// Wraps a continuation.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Exchange> + Send + 'a,
    {
        Self::Async(Box::pin(future))
    }

    /// Returns true if the processor finished before returning.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    /// Returns the exchange if the completion is synchronous.
    ///
    /// # Errors
    ///
    /// Returns the completion unchanged when it is asynchronous.
    pub fn into_sync(self) -> Result<Exchange, Self> {
        match self {
            Self::Sync(exchange) => Ok(exchange),
            other @ Self::Async(_) => Err(other),
        }
    }

    /// Applies `f` to the exchange once it is available, staying synchronous
    /// when possible.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Exchange) -> Exchange + Send + 'a,
    {
        match self {
            Self::Sync(exchange) => Self::Sync(f(exchange)),
            Self::Async(future) => Self::pending(async move { f(future.await) }),
        }
    }
}

impl<'a> IntoFuture for Completion<'a> {
    type Output = Exchange;
    type IntoFuture = ExchangeFuture<'a>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Sync(exchange) => Box::pin(futures::future::ready(exchange)),
            Self::Async(future) => future,
        }
    }
}

impl fmt::Debug for Completion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(exchange) => f.debug_tuple("Sync").field(&exchange.id()).finish(),
            Self::Async(_) => f.write_str("Async(<pending>)"),
        }
    }
}
