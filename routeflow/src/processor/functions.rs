//! Closure-based and small utility processors.

use super::{Completion, Processor};
use crate::core::{Body, Exchange};
use crate::errors::ExchangeFailure;
use std::any::Any;
use std::fmt::{self, Debug};
use std::future::Future;
use tracing::info;

/// A processor backed by a synchronous closure.
///
/// Returning `Err` captures the failure on the exchange, tagged with this
/// processor's name.
pub struct FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), ExchangeFailure> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), ExchangeFailure> + Send + Sync,
{
    /// Creates a new closure processor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), ExchangeFailure> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcessor").field("name", &self.name).finish()
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut Exchange) -> Result<(), ExchangeFailure> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, mut exchange: Exchange) -> Completion<'a> {
        if let Err(failure) = (self.func)(&mut exchange) {
            let failure = if failure.processor.is_none() {
                failure.with_processor(&self.name)
            } else {
                failure
            };
            exchange.set_failure(failure);
        }
        Completion::Sync(exchange)
    }
}

/// A processor backed by an async closure.
///
/// Always completes asynchronously.
pub struct AsyncFnProcessor<F, Fut>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Exchange> + Send + 'static,
{
    name: String,
    func: F,
}

impl<F, Fut> AsyncFnProcessor<F, Fut>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Exchange> + Send + 'static,
{
    /// Creates a new async closure processor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F, Fut> Debug for AsyncFnProcessor<F, Fut>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Exchange> + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnProcessor").field("name", &self.name).finish()
    }
}

impl<F, Fut> Processor for AsyncFnProcessor<F, Fut>
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Exchange> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        Completion::pending((self.func)(exchange))
    }
}

/// Replaces the request body with a fixed value.
#[derive(Debug, Clone)]
pub struct SetBodyProcessor {
    name: String,
    body: Body,
}

impl SetBodyProcessor {
    /// Creates a processor that sets the body to `body`.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, body: T) -> Self {
        Self {
            name: name.into(),
            body: Body::new(body),
        }
    }
}

impl Processor for SetBodyProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, mut exchange: Exchange) -> Completion<'a> {
        exchange.in_message_mut().set_raw_body(self.body.clone());
        Completion::Sync(exchange)
    }
}

/// Sets a request header to a fixed value.
#[derive(Debug, Clone)]
pub struct SetHeaderProcessor {
    name: String,
    header: String,
    value: serde_json::Value,
}

impl SetHeaderProcessor {
    /// Creates a processor that sets `header` to `value`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        header: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            header: header.into(),
            value: value.into(),
        }
    }
}

impl Processor for SetHeaderProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, mut exchange: Exchange) -> Completion<'a> {
        exchange.set_header(self.header.clone(), self.value.clone());
        Completion::Sync(exchange)
    }
}

/// Logs each exchange passing through.
#[derive(Debug, Clone)]
pub struct LogProcessor {
    name: String,
}

impl LogProcessor {
    /// Creates a new log processor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Processor for LogProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        info!(
            processor = %self.name,
            exchange_id = %exchange.id(),
            body = ?exchange.body(),
            failed = exchange.is_failed(),
            "Exchange"
        );
        Completion::Sync(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use std::time::Duration;

    #[test]
    fn test_fn_processor_completes_sync() {
        let processor = FnProcessor::new("upper", |ex: &mut Exchange| {
            let body = ex.body_string().unwrap_or_default().to_uppercase();
            ex.set_body(body);
            Ok(())
        });

        let completion = processor.process(Exchange::with_body("hello"));
        let exchange = completion.into_sync().unwrap();
        assert_eq!(exchange.body_string().as_deref(), Some("HELLO"));
    }

    #[test]
    fn test_fn_processor_tags_failure() {
        let processor = FnProcessor::new("validator", |_ex: &mut Exchange| {
            Err(ExchangeFailure::structural("missing body"))
        });

        let exchange = processor.process(Exchange::new()).into_sync().unwrap();
        let failure = exchange.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Structural);
        assert_eq!(failure.processor.as_deref(), Some("validator"));
    }

    #[tokio::test]
    async fn test_async_fn_processor() {
        let processor = AsyncFnProcessor::new("delayed", |mut ex: Exchange| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ex.set_header("done", true);
            ex
        });

        let completion = processor.process(Exchange::with_body("x"));
        assert!(!completion.is_sync());
        let exchange = completion.await;
        assert_eq!(exchange.header("done"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_set_body_and_header() {
        let set_body = SetBodyProcessor::new("body", "Bye World");
        let set_header = SetHeaderProcessor::new("header", "id", 123);

        let exchange = set_body.process(Exchange::with_body("Hello")).into_sync().unwrap();
        let exchange = set_header.process(exchange).into_sync().unwrap();

        assert_eq!(exchange.body_string().as_deref(), Some("Bye World"));
        assert_eq!(exchange.header("id"), Some(&serde_json::json!(123)));
    }

    #[test]
    fn test_log_processor_passes_through() {
        let processor = LogProcessor::new("log");
        let exchange = processor.process(Exchange::with_body("x")).into_sync().unwrap();
        assert_eq!(exchange.body_string().as_deref(), Some("x"));
    }
}
