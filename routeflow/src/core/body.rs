//! Type-erased message body.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An opaque, type-erased message payload.
///
/// The payload is shared behind an `Arc`, so cloning a body (and therefore an
/// exchange) never copies the payload. Replacing the body swaps the pointer.
#[derive(Clone, Default)]
pub struct Body(Option<Arc<dyn Any + Send + Sync>>);

impl Body {
    /// Creates an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self(None)
    }

    /// Wraps a value as a body.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Returns true if there is no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the payload if it is of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns true if the payload is of type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// Converts common payload types to a string.
    ///
    /// Strings, string slices, integers, floats, booleans and JSON values are
    /// supported. JSON strings are returned without quotes.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        let value = self.0.as_deref()?;

        if let Some(s) = value.downcast_ref::<String>() {
            return Some(s.clone());
        }
        if let Some(s) = value.downcast_ref::<&'static str>() {
            return Some((*s).to_string());
        }
        if let Some(v) = value.downcast_ref::<serde_json::Value>() {
            return Some(match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        macro_rules! display_as {
            ($($t:ty),*) => {
                $(
                    if let Some(n) = value.downcast_ref::<$t>() {
                        return Some(n.to_string());
                    }
                )*
            };
        }
        display_as!(i32, i64, u32, u64, usize, f64, bool, char);
        None
    }

    /// Converts the payload to a JSON value where possible.
    ///
    /// Non-JSON text-like payloads become JSON strings or numbers.
    #[must_use]
    pub fn to_json(&self) -> Option<serde_json::Value> {
        let value = self.0.as_deref()?;

        if let Some(v) = value.downcast_ref::<serde_json::Value>() {
            return Some(v.clone());
        }
        if let Some(n) = value.downcast_ref::<i64>() {
            return Some(serde_json::json!(n));
        }
        if let Some(n) = value.downcast_ref::<i32>() {
            return Some(serde_json::json!(n));
        }
        if let Some(n) = value.downcast_ref::<u64>() {
            return Some(serde_json::json!(n));
        }
        if let Some(b) = value.downcast_ref::<bool>() {
            return Some(serde_json::json!(b));
        }
        self.to_text().map(serde_json::Value::String)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.0, self.to_text()) {
            (None, _) => write!(f, "Body(<empty>)"),
            (Some(_), Some(text)) => write!(f, "Body({text:?})"),
            (Some(_), None) => write!(f, "Body(<opaque>)"),
        }
    }
}
