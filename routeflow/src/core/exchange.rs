//! The exchange: unit of work carried through a route.

use super::{keys, Body, Message};
use crate::errors::ExchangeFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically assigned exchange identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(u64);

impl ExchangeId {
    /// Allocates the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID-{}", self.0)
    }
}

/// Message exchange pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePattern {
    /// Fire-and-forget; no response expected.
    #[default]
    InOnly,
    /// Request-reply; a response message may be produced.
    InOut,
}

/// The unit of work flowing through the engine.
///
/// An exchange always holds a request message. It may additionally carry a
/// response message, engine-local properties and a captured failure. An
/// exchange has a single logical owner at a time: processors take it by value
/// and hand it back when they complete.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: ExchangeId,
    pattern: ExchangePattern,
    created_at: DateTime<Utc>,
    in_message: Message,
    out_message: Option<Message>,
    properties: HashMap<String, serde_json::Value>,
    failure: Option<ExchangeFailure>,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange {
    /// Creates an exchange with an empty request message.
    #[must_use]
    pub fn new() -> Self {
        Self::from_message(Message::new())
    }

    /// Creates an exchange around a request message.
    #[must_use]
    pub fn from_message(message: Message) -> Self {
        Self {
            id: ExchangeId::next(),
            pattern: ExchangePattern::InOnly,
            created_at: Utc::now(),
            in_message: message,
            out_message: None,
            properties: HashMap::new(),
            failure: None,
        }
    }

    /// Creates an exchange whose request message has the given body.
    #[must_use]
    pub fn with_body<T: Any + Send + Sync>(body: T) -> Self {
        Self::from_message(Message::with_body(body))
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.in_message.set_header(name, value);
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Sets the exchange pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Creates an independent copy with a fresh identifier.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            id: ExchangeId::next(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Returns the exchange identifier.
    #[must_use]
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// Returns the exchange pattern.
    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    /// Returns when the exchange was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // Messages

    /// Returns the request message.
    #[must_use]
    pub fn in_message(&self) -> &Message {
        &self.in_message
    }

    /// Returns the request message for mutation.
    pub fn in_message_mut(&mut self) -> &mut Message {
        &mut self.in_message
    }

    /// Returns the response message, if one was produced.
    #[must_use]
    pub fn out_message(&self) -> Option<&Message> {
        self.out_message.as_ref()
    }

    /// Returns the response message, creating an empty one if absent.
    pub fn out_message_mut(&mut self) -> &mut Message {
        self.out_message.get_or_insert_with(Message::new)
    }

    /// Sets the response message.
    pub fn set_out_message(&mut self, message: Message) {
        self.out_message = Some(message);
    }

    /// Removes and returns the response message.
    pub fn take_out_message(&mut self) -> Option<Message> {
        self.out_message.take()
    }

    /// Returns true if a response message is present.
    #[must_use]
    pub fn has_out(&self) -> bool {
        self.out_message.is_some()
    }

    /// Returns the response message if present, otherwise the request.
    #[must_use]
    pub fn result_message(&self) -> &Message {
        self.out_message.as_ref().unwrap_or(&self.in_message)
    }

    /// Returns the request body.
    #[must_use]
    pub fn body(&self) -> &Body {
        self.in_message.body()
    }

    /// Returns the request body as `T` if it has that type.
    #[must_use]
    pub fn body_as<T: Any>(&self) -> Option<&T> {
        self.in_message.body_as::<T>()
    }

    /// Returns the request body converted to text.
    #[must_use]
    pub fn body_string(&self) -> Option<String> {
        self.in_message.body().to_text()
    }

    /// Returns the request body as JSON, if it converts.
    #[must_use]
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.in_message.body().to_json()
    }

    /// Replaces the request body.
    pub fn set_body<T: Any + Send + Sync>(&mut self, body: T) {
        self.in_message.set_body(body);
    }

    /// Gets a request header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&serde_json::Value> {
        self.in_message.header(name)
    }

    /// Sets a request header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.in_message.set_header(name, value);
    }

    // Properties

    /// Gets a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    /// Gets a property as a boolean; absent or non-boolean is false.
    #[must_use]
    pub fn property_flag(&self, name: &str) -> bool {
        self.properties
            .get(name)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Sets a property.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Removes a property.
    pub fn remove_property(&mut self, name: &str) -> Option<serde_json::Value> {
        self.properties.remove(name)
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, serde_json::Value> {
        &self.properties
    }

    // Failure

    /// Returns the captured failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&ExchangeFailure> {
        self.failure.as_ref()
    }

    /// Returns true if a failure is captured.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Captures a failure, replacing any previous one.
    pub fn set_failure(&mut self, failure: ExchangeFailure) {
        self.failure = Some(failure);
    }

    /// Removes and returns the captured failure.
    pub fn clear_failure(&mut self) -> Option<ExchangeFailure> {
        self.failure.take()
    }

    /// Marks the captured failure as handled by a dead-letter destination.
    ///
    /// The failure stays attached. Does nothing when no failure is captured.
    pub fn mark_failure_handled(&mut self) {
        if let Some(failure) = self.failure.as_mut() {
            failure.handled = true;
            self.properties
                .insert(keys::FAILURE_HANDLED.to_string(), serde_json::Value::Bool(true));
        }
    }

    /// Returns true if a captured failure has been handled.
    #[must_use]
    pub fn is_failure_handled(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.handled)
    }
}
