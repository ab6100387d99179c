//! Core data model carried through every processing step.
//!
//! This module contains:
//! - The type-erased message body
//! - Case-insensitive message headers
//! - The message envelope and the exchange (unit of work)
//! - Well-known property and header keys
//! - Time pattern parsing

mod body;
mod exchange;
mod headers;
pub mod keys;
mod message;
pub(crate) mod time;

pub use body::Body;
pub use exchange::{Exchange, ExchangeId, ExchangePattern};
pub use headers::Headers;
pub use message::Message;
pub use time::parse_time_pattern;
