//! Pipelines and routes.
//!
//! A [`Pipeline`] runs an ordered list of steps over one exchange, moving to
//! an async continuation the first time a step does not finish inline. A
//! [`PipelineBuilder`] assembles steps, nested sub-pipelines, disabled flags
//! and error handler regions. A [`Route`] owns a built pipeline together with
//! the shutdown token its error handlers and aggregators observe.

mod builder;
mod composer;
mod route;

pub use builder::PipelineBuilder;
pub use composer::{Pipeline, Step};
pub use route::Route;
