//! Message envelope.

use super::{Body, Headers};
use std::any::Any;

/// An in-memory envelope with a body and headers.
///
/// A message has no identity of its own; it belongs to an exchange.
#[derive(Debug, Clone, Default)]
pub struct Message {
    body: Body,
    headers: Headers,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message with the given body.
    #[must_use]
    pub fn with_body<T: Any + Send + Sync>(body: T) -> Self {
        Self {
            body: Body::new(body),
            headers: Headers::new(),
        }
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the body as `T` if it has that type.
    #[must_use]
    pub fn body_as<T: Any>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }

    /// Replaces the body.
    pub fn set_body<T: Any + Send + Sync>(&mut self, body: T) {
        self.body = Body::new(body);
    }

    /// Replaces the body with an already-erased body.
    pub fn set_raw_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the headers for mutation.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Gets a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&serde_json::Value> {
        self.headers.get(name)
    }

    /// Sets a header value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_and_headers() {
        let mut message = Message::with_body("Hello World");
        message.set_header("id", 123);

        assert_eq!(message.body().to_text().as_deref(), Some("Hello World"));
        assert_eq!(message.header("ID"), Some(&serde_json::json!(123)));

        message.set_body(5_u64);
        assert_eq!(message.body_as::<u64>(), Some(&5));
    }
}
