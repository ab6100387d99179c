//! Case-insensitive message headers.

use std::collections::HashMap;

/// Message headers keyed case-insensitively.
///
/// The casing used on first insertion is kept for iteration; later writes
/// with a different casing update the same entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: HashMap<String, (String, serde_json::Value)>,
}

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(&name.to_ascii_lowercase()).map(|(_, v)| v)
    }

    /// Inserts a header, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let name = name.into();
        let value = value.into();
        let key = name.to_ascii_lowercase();

        match self.entries.get_mut(&key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.insert(key, (name, value));
                None
            }
        }
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<serde_json::Value> {
        self.entries.remove(&name.to_ascii_lowercase()).map(|(_, v)| v)
    }

    /// Checks if a header exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over headers with their original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.values().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns a copy of all headers with their original casing.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }
}
