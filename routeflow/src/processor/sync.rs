//! Synchronous-forcing adapter over any processor.
//!
//! Collaborators that cannot suspend use these helpers to hold the calling
//! thread until a continuation fires. On a multi-thread runtime the wait goes
//! through `block_in_place`, so the blocked worker hands its queue to the rest
//! of the pool and the continuation can still be driven.

use super::{Completion, Processor};
use crate::core::Exchange;
use crate::errors::{ExchangeFailure, RouteflowError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

/// Runs `processor` on `exchange` and blocks until it completes.
///
/// # Errors
///
/// Returns `SyncWaitTimeout` if `timeout` elapses first, or `Runtime` if no
/// runtime could be obtained to drive the continuation.
pub fn process_blocking(
    processor: &dyn Processor,
    exchange: Exchange,
    timeout: Option<Duration>,
) -> Result<Exchange, RouteflowError> {
    let exchange_id = exchange.id();

    let future = match processor.process(exchange) {
        Completion::Sync(exchange) => return Ok(exchange),
        Completion::Async(future) => future,
    };

    let bounded = async move {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.ok(),
            None => Some(future.await),
        }
    };

    block_on(bounded)?.ok_or_else(|| RouteflowError::SyncWaitTimeout {
        exchange_id: exchange_id.to_string(),
        timeout_ms: timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
    })
}

fn block_on<F>(future: F) -> Result<F::Output, RouteflowError>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            // The only worker is the caller; drive the continuation on a
            // scoped helper thread with its own runtime.
            std::thread::scope(|scope| {
                scope
                    .spawn(|| fresh_runtime().map(|rt| rt.block_on(future)))
                    .join()
                    .map_err(|_| RouteflowError::Runtime("blocking wait panicked".to_string()))?
            })
        }
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        Err(_) => Ok(fresh_runtime()?.block_on(future)),
    }
}

fn fresh_runtime() -> Result<tokio::runtime::Runtime, RouteflowError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RouteflowError::Runtime(e.to_string()))
}

/// Wraps a processor so that it always completes synchronously.
///
/// If the wait times out, the exchange is returned as it was before
/// processing with an infrastructure failure attached.
pub struct SynchronousProcessor {
    name: String,
    inner: Arc<dyn Processor>,
    timeout: Option<Duration>,
}

impl SynchronousProcessor {
    /// Wraps `inner` without a wait limit.
    #[must_use]
    pub fn new(inner: Arc<dyn Processor>) -> Self {
        Self {
            name: format!("sync({})", inner.name()),
            inner,
            timeout: None,
        }
    }

    /// Sets the maximum time to wait for a continuation.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for SynchronousProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronousProcessor")
            .field("inner", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Processor for SynchronousProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        let fallback = exchange.clone();

        match process_blocking(self.inner.as_ref(), exchange, self.timeout) {
            Ok(exchange) => Completion::Sync(exchange),
            Err(err) => {
                warn!(
                    processor = %self.inner.name(),
                    exchange_id = %fallback.id(),
                    error = %err,
                    "Blocking wait failed"
                );
                let mut exchange = fallback;
                exchange.set_failure(
                    ExchangeFailure::infrastructure(err.to_string()).with_processor(self.inner.name()),
                );
                Completion::Sync(exchange)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::processor::AsyncFnProcessor;

    fn delayed(ms: u64) -> Arc<dyn Processor> {
        Arc::new(AsyncFnProcessor::new("delayed", move |mut ex: Exchange| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ex.set_body("order accepted");
            ex
        }))
    }

    #[test]
    fn test_blocking_outside_runtime() {
        let exchange = process_blocking(delayed(10).as_ref(), Exchange::with_body("Hello"), None).unwrap();
        assert_eq!(exchange.body_string().as_deref(), Some("order accepted"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_inside_multi_thread_runtime() {
        let exchange = process_blocking(delayed(10).as_ref(), Exchange::with_body("Hello"), None).unwrap();
        assert_eq!(exchange.body_string().as_deref(), Some("order accepted"));
    }

    #[tokio::test]
    async fn test_blocking_inside_current_thread_runtime() {
        let exchange = process_blocking(delayed(5).as_ref(), Exchange::with_body("Hello"), None).unwrap();
        assert_eq!(exchange.body_string().as_deref(), Some("order accepted"));
    }

    #[test]
    fn test_blocking_timeout() {
        let exchange = Exchange::with_body("Hello");
        let id = exchange.id().to_string();

        let err = process_blocking(delayed(500).as_ref(), exchange, Some(Duration::from_millis(20))).unwrap_err();
        match err {
            RouteflowError::SyncWaitTimeout { exchange_id, timeout_ms } => {
                assert_eq!(exchange_id, id);
                assert_eq!(timeout_ms, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_synchronous_processor_always_sync() {
        let adapter = SynchronousProcessor::new(delayed(10));
        let completion = adapter.process(Exchange::with_body("Hello"));

        assert!(completion.is_sync());
        let exchange = completion.await;
        assert_eq!(exchange.body_string().as_deref(), Some("order accepted"));
    }

    #[test]
    fn test_synchronous_processor_timeout_surfaces_failure() {
        let adapter = SynchronousProcessor::new(delayed(500)).with_timeout(Duration::from_millis(10));
        let exchange = adapter.process(Exchange::with_body("Hello")).into_sync().unwrap();

        assert_eq!(exchange.body_string().as_deref(), Some("Hello"));
        let failure = exchange.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Infrastructure);
        assert_eq!(failure.processor.as_deref(), Some("delayed"));
    }
}
