//! Cooperative cancellation for route shutdown.
//!
//! A route owns one token and shares it with every error handler and
//! aggregator it contains. Cancelling the token interrupts pending
//! redelivery waits and stops timeout sweeps.

mod token;

pub use token::CancellationToken;
