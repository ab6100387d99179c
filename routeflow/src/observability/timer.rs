//! Step timing.

use std::time::{Duration, Instant};

/// Wall-clock timer for one step invocation.
///
/// Spans the whole step, including time spent waiting on an async
/// continuation.
#[derive(Debug)]
pub struct SpanTimer {
    label: String,
    started: Instant,
}

impl SpanTimer {
    /// Starts timing the step labelled `label`.
    #[must_use]
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
        }
    }

    /// Returns the label given at start.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.label
    }

    /// Time since the timer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed milliseconds, fractional.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Stops the timer, returning elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_step() {
        let timer = SpanTimer::start("orders-1");
        assert_eq!(timer.name(), "orders-1");
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.finish() >= 10.0);
    }
}
