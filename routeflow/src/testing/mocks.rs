//! Mock processors for testing.

use crate::core::Exchange;
use crate::errors::{ExchangeFailure, FailureKind};
use crate::processor::{Completion, Processor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A processor that records every exchange it receives.
#[derive(Debug)]
pub struct MockProcessor {
    name: String,
    received: Mutex<Vec<Exchange>>,
    arrivals: Notify,
}

impl MockProcessor {
    /// Creates a new mock processor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Mutex::new(Vec::new()),
            arrivals: Notify::new(),
        }
    }

    /// Returns the number of exchanges received.
    #[must_use]
    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    /// Returns copies of the received exchanges, in arrival order.
    #[must_use]
    pub fn received_exchanges(&self) -> Vec<Exchange> {
        self.received.lock().clone()
    }

    /// Returns the received bodies as text.
    #[must_use]
    pub fn received_bodies(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|ex| ex.body_string().unwrap_or_default())
            .collect()
    }

    /// Waits until at least `count` exchanges arrived or `timeout` elapses.
    ///
    /// Returns true if the count was reached.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.arrivals.notified();
                if self.received_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Forgets everything received so far.
    pub fn reset(&self) {
        self.received.lock().clear();
    }
}

impl Processor for MockProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        self.received.lock().push(exchange.clone());
        self.arrivals.notify_waiters();
        Completion::Sync(exchange)
    }
}

/// A processor that fails, always or for its first few calls.
#[derive(Debug)]
pub struct FailingProcessor {
    name: String,
    kind: FailureKind,
    message: String,
    fail_first: Option<usize>,
    calls: AtomicUsize,
}

impl FailingProcessor {
    /// Creates a processor that always fails with `kind`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FailureKind) -> Self {
        let name = name.into();
        Self {
            message: format!("{name} failed"),
            name,
            kind,
            fail_first: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails only the first `attempts` calls, then passes exchanges through.
    #[must_use]
    pub fn fail_first(mut self, attempts: usize) -> Self {
        self.fail_first = Some(attempts);
        self
    }

    /// Sets the failure message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Processor for FailingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, mut exchange: Exchange) -> Completion<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_first.map_or(true, |limit| call <= limit) {
            exchange.set_failure(ExchangeFailure::new(self.kind, self.message.clone()));
        }
        Completion::Sync(exchange)
    }
}

/// A processor that completes asynchronously after a delay.
///
/// Optionally replaces or extends the body with a reply, and can fail its
/// first attempts with an infrastructure failure.
#[derive(Debug)]
pub struct AsyncDelayProcessor {
    name: String,
    delay: Duration,
    reply: Option<String>,
    append: bool,
    fail_first_attempts: usize,
    calls: AtomicUsize,
}

impl AsyncDelayProcessor {
    /// Creates a processor that waits `delay` and passes the exchange on.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            reply: None,
            append: false,
            fail_first_attempts: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the body to `reply` on success.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Appends the reply to the existing body instead of replacing it.
    #[must_use]
    pub fn appending(mut self) -> Self {
        self.append = true;
        self
    }

    /// Fails the first `attempts` calls.
    #[must_use]
    pub fn fail_first_attempts(mut self, attempts: usize) -> Self {
        self.fail_first_attempts = attempts;
        self
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Processor for AsyncDelayProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, mut exchange: Exchange) -> Completion<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        Completion::pending(async move {
            tokio::time::sleep(self.delay).await;

            if call <= self.fail_first_attempts {
                exchange.set_failure(ExchangeFailure::infrastructure(format!(
                    "Simulated failure at attempt {call}"
                )));
                return exchange;
            }

            if let Some(reply) = &self.reply {
                let body = if self.append {
                    format!("{}{reply}", exchange.body_string().unwrap_or_default())
                } else {
                    reply.clone()
                };
                exchange.set_body(body);
            }
            exchange
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mock_records() {
        let mock = MockProcessor::new("mock");
        let _ = mock.process(Exchange::with_body("A")).into_sync().unwrap();
        let _ = mock.process(Exchange::with_body("B")).into_sync().unwrap();

        assert_eq!(mock.received_count(), 2);
        assert_eq!(mock.received_bodies(), vec!["A".to_string(), "B".to_string()]);

        mock.reset();
        assert_eq!(mock.received_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_count() {
        let mock = Arc::new(MockProcessor::new("mock"));
        assert!(!mock.wait_for_count(1, Duration::from_millis(20)).await);

        let sender = Arc::clone(&mock);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = sender.process(Exchange::with_body("late")).await;
        });
        assert!(mock.wait_for_count(1, Duration::from_secs(1)).await);
    }

    #[test]
    fn test_failing_processor_fail_first() {
        let failing = FailingProcessor::new("f", FailureKind::Business).fail_first(1);

        let first = failing.process(Exchange::new()).into_sync().unwrap();
        assert!(first.is_failed());
        let second = failing.process(Exchange::new()).into_sync().unwrap();
        assert!(!second.is_failed());
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn test_async_delay_processor() {
        let processor = AsyncDelayProcessor::new("async", Duration::from_millis(5))
            .with_reply(" World")
            .appending()
            .fail_first_attempts(1);

        let first = processor.process(Exchange::with_body("Hello")).await;
        assert!(first.is_failed());

        let second = processor.process(Exchange::with_body("Hello")).await;
        assert_eq!(second.body_string().as_deref(), Some("Hello World"));
    }
}
