//! Routes: a built pipeline with a lifecycle.

use super::{Pipeline, PipelineBuilder};
use crate::cancellation::CancellationToken;
use crate::core::Exchange;
use crate::errorhandler::RedeliveryMetrics;
use crate::errors::RouteflowError;
use crate::processor::{process_blocking, Processor};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A named pipeline that accepts exchanges until it is shut down.
///
/// Shutting a route down cancels the token its error handlers wait on, so
/// exchanges sleeping between redeliveries come back failed, and stops the
/// timeout sweepers of its aggregators.
#[derive(Debug)]
pub struct Route {
    id: String,
    pipeline: Arc<Pipeline>,
    redelivery: Option<Arc<RedeliveryMetrics>>,
    sync_timeout: Option<Duration>,
}

impl Route {
    /// Builds a route from a pipeline definition.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the route when the pipeline is
    /// rejected.
    pub fn new(id: impl Into<String>, builder: PipelineBuilder) -> Result<Self, RouteflowError> {
        let id = id.into();
        let redelivery = builder.redelivery_metrics();
        let pipeline = builder.build().map_err(|e| e.with_route(id.clone()))?;

        Ok(Self {
            id,
            pipeline: Arc::new(pipeline),
            redelivery,
            sync_timeout: None,
        })
    }

    /// Bounds how long [`Route::send_blocking`] waits.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Returns the route id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the route's pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Number of top-level steps, disabled ones included.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.pipeline.step_count()
    }

    /// Metrics of the route-level error handler, if one is configured.
    #[must_use]
    pub fn redelivery_metrics(&self) -> Option<&Arc<RedeliveryMetrics>> {
        self.redelivery.as_ref()
    }

    /// Returns the shutdown token shared with error handlers.
    #[must_use]
    pub fn shutdown_token(&self) -> &Arc<CancellationToken> {
        self.pipeline.shutdown_token()
    }

    /// Returns true once [`Route::shutdown`] was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown_token().is_cancelled()
    }

    /// Starts the timeout sweepers of the route's aggregators.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        for aggregator in self.pipeline.aggregators() {
            aggregator.start();
        }
        info!(route = %self.id, steps = self.step_count(), "Route started");
    }

    /// Sends an exchange through the route.
    ///
    /// Failures are reported on the returned exchange.
    ///
    /// # Errors
    ///
    /// Returns `ShutDown` if the route no longer accepts exchanges.
    pub async fn send(&self, exchange: Exchange) -> Result<Exchange, RouteflowError> {
        self.ensure_running()?;
        Ok(self.pipeline.process(exchange).await)
    }

    /// Sends an exchange and blocks the calling thread until it completes.
    ///
    /// # Errors
    ///
    /// Returns `ShutDown` if the route no longer accepts exchanges, or
    /// `SyncWaitTimeout` if the configured wait elapses.
    pub fn send_blocking(&self, exchange: Exchange) -> Result<Exchange, RouteflowError> {
        self.ensure_running()?;
        process_blocking(self.pipeline.as_ref(), exchange, self.sync_timeout)
    }

    /// Stops the route.
    ///
    /// Pending redelivery waits are interrupted and aggregators stop; those
    /// configured to force completion emit their open groups first.
    pub async fn shutdown(&self) {
        self.shutdown_token().cancel(format!("route '{}' shut down", self.id));
        for aggregator in self.pipeline.aggregators() {
            aggregator.shutdown().await;
        }
        info!(route = %self.id, "Route shut down");
    }

    fn ensure_running(&self) -> Result<(), RouteflowError> {
        if self.is_shut_down() {
            return Err(RouteflowError::ShutDown(self.id.clone()));
        }
        Ok(())
    }
}
