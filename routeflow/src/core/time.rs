//! Time patterns such as `"1h30m1s"` or `"300ms"`.

use crate::errors::RouteValidationError;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

const UNITS: [(&str, u64); 4] = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1000)];

/// Parses a time pattern into a duration.
///
/// A pattern is either a plain number of milliseconds (`"444"`) or a
/// sequence of number and unit pairs, with units `h`, `m`, `s` and `ms`
/// (`"1h30m1s"`, `"30m55s"`, `"300ms"`). Surrounding whitespace is ignored.
///
/// # Errors
///
/// Rejects empty input, unknown units, a unit without a number, negative
/// values and totals that overflow.
pub fn parse_time_pattern(pattern: &str) -> Result<Duration, RouteValidationError> {
    let invalid = |reason: &str| {
        RouteValidationError::new(format!("Invalid time pattern: {reason}"))
            .with_context_entry("pattern", pattern.to_string())
    };

    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    if let Ok(millis) = trimmed.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }

    let mut total: u64 = 0;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid("number too large"))?;
        rest = &rest[digits..];

        let (unit, scale) = UNITS
            .iter()
            .find(|(unit, _)| rest.starts_with(unit))
            .ok_or_else(|| invalid("unknown unit"))?;
        rest = &rest[unit.len()..];

        total = value
            .checked_mul(*scale)
            .and_then(|millis| total.checked_add(millis))
            .ok_or_else(|| invalid("duration too large"))?;
    }
    Ok(Duration::from_millis(total))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Millis {
    Number(u64),
    Pattern(String),
}

impl Millis {
    fn into_millis<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Number(millis) => Ok(millis),
            Self::Pattern(pattern) => {
                let duration = parse_time_pattern(&pattern).map_err(E::custom)?;
                u64::try_from(duration.as_millis()).map_err(E::custom)
            }
        }
    }
}

/// Deserializes milliseconds given as a number or a time pattern.
pub(crate) fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Millis::deserialize(deserializer)?.into_millis()
}

/// Optional form of [`deserialize_millis`].
pub(crate) fn deserialize_opt_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    Option::<Millis>::deserialize(deserializer)?
        .map(Millis::into_millis)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn millis(pattern: &str) -> u128 {
        parse_time_pattern(pattern).unwrap().as_millis()
    }

    #[test]
    fn test_plain_number_is_milliseconds() {
        assert_eq!(millis("444"), 444);
        assert_eq!(millis(" 250 "), 250);
    }

    #[test]
    fn test_unit_patterns() {
        assert_eq!(millis("1h30m1s"), 5_401_000);
        assert_eq!(millis("5m"), 300_000);
        assert_eq!(millis("30m55s"), 1_855_000);
        assert_eq!(millis("300s"), 300_000);
        assert_eq!(millis("300ms"), 300);
        assert_eq!(millis("1s500ms"), 1500);
    }

    #[test]
    fn test_rejected_patterns() {
        for pattern in ["", "  ", "-72", "5x", "h", "10m5", "99999999999999999999ms"] {
            assert!(parse_time_pattern(pattern).is_err(), "{pattern:?} was accepted");
        }
    }
}
