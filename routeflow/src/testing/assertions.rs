//! Test assertions for exchanges.

use crate::core::Exchange;
use crate::errors::FailureKind;

/// Asserts that the exchange carries no failure.
pub fn assert_not_failed(exchange: &Exchange) {
    assert!(
        !exchange.is_failed(),
        "Expected no failure, got: {:?}",
        exchange.failure()
    );
}

/// Asserts that the exchange failed with the given kind.
pub fn assert_failed_with(exchange: &Exchange, kind: FailureKind) {
    let failure = exchange
        .failure()
        .unwrap_or_else(|| panic!("Expected a {kind} failure on exchange {}", exchange.id()));
    assert_eq!(failure.kind, kind, "Unexpected failure kind: {failure}");
}

/// Asserts that a dead-letter destination handled the exchange's failure.
pub fn assert_failure_handled(exchange: &Exchange) {
    assert!(
        exchange.is_failure_handled(),
        "Expected a handled failure, got: {:?}",
        exchange.failure()
    );
}

/// Asserts the request body as text.
pub fn assert_body(exchange: &Exchange, expected: &str) {
    let actual = exchange.body_string();
    assert_eq!(
        actual.as_deref(),
        Some(expected),
        "Expected body {expected:?}, got {actual:?}"
    );
}

/// Asserts a property value.
pub fn assert_property(exchange: &Exchange, name: &str, expected: &serde_json::Value) {
    let actual = exchange.property(name);
    assert_eq!(
        actual,
        Some(expected),
        "Expected value {expected:?} for property '{name}', got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExchangeFailure;

    #[test]
    fn test_assertions_pass() {
        let mut exchange = Exchange::with_body("Hello").with_property("k", 1);
        assert_not_failed(&exchange);
        assert_body(&exchange, "Hello");
        assert_property(&exchange, "k", &serde_json::json!(1));

        exchange.set_failure(ExchangeFailure::business("boom"));
        exchange.mark_failure_handled();
        assert_failed_with(&exchange, FailureKind::Business);
        assert_failure_handled(&exchange);
    }

    #[test]
    #[should_panic(expected = "Expected no failure")]
    fn test_assert_not_failed_panics() {
        let mut exchange = Exchange::new();
        exchange.set_failure(ExchangeFailure::business("boom"));
        assert_not_failed(&exchange);
    }
}
