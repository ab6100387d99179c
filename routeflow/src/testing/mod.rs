//! Testing utilities for routeflow routes.
//!
//! This module provides:
//! - Recording, failing and delayed processors
//! - Assertions on exchange outcomes
//! - Log capture setup for tests

mod assertions;
mod logging;
mod mocks;

pub use assertions::{
    assert_body, assert_failed_with, assert_failure_handled, assert_not_failed, assert_property,
};
pub use logging::init_test_logging;
pub use mocks::{AsyncDelayProcessor, FailingProcessor, MockProcessor};
