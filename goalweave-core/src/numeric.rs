//! Symbolic numbers carried by fluents: integers or floats.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A numeric literal, either integer or floating point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Numeric comparison across the two representations.
    pub fn cmp_value(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (a, b) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
        }
    }

    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a + b),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a - b),
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }

    pub fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a * b),
            (a, b) => Number::Float(a.as_f64() * b.as_f64()),
        }
    }
}

impl FromStr for Number {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(i) = s.parse::<i64>() {
            return Ok(Number::Int(i));
        }
        s.parse::<f64>().map(Number::Float)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Is the string a numeric literal.
pub fn is_number(s: &str) -> bool {
    !s.is_empty() && s.parse::<Number>().is_ok()
}

/// Add two numeric strings, keeping the integer representation when possible.
pub fn plus_str(a: &str, b: &str) -> Option<String> {
    let (a, b) = (a.parse::<Number>().ok()?, b.parse::<Number>().ok()?);
    Some(a.add(b).to_string())
}

/// Subtract two numeric strings.
pub fn minus_str(a: &str, b: &str) -> Option<String> {
    let (a, b) = (a.parse::<Number>().ok()?, b.parse::<Number>().ok()?);
    Some(a.sub(b).to_string())
}

/// Multiply two numeric strings.
pub fn multiply_str(a: &str, b: &str) -> Option<String> {
    let (a, b) = (a.parse::<Number>().ok()?, b.parse::<Number>().ok()?);
    Some(a.mul(b).to_string())
}

/// Compare a stored fluent value against a number.
///
/// `superior` selects `>`-family comparison, `can_be_equal` includes equality.
pub fn compare_number_str(value: &str, nb: Number, superior: bool, can_be_equal: bool) -> bool {
    let Ok(value) = value.parse::<Number>() else {
        return false;
    };
    match value.cmp_value(nb) {
        Ordering::Equal => can_be_equal,
        Ordering::Greater => superior,
        Ordering::Less => !superior,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_and_float() {
        assert_eq!("42".parse::<Number>().unwrap(), Number::Int(42));
        assert_eq!("-3".parse::<Number>().unwrap(), Number::Int(-3));
        assert_eq!("2.5".parse::<Number>().unwrap(), Number::Float(2.5));
        assert!("abc".parse::<Number>().is_err());
    }

    #[test]
    fn test_arithmetic_keeps_ints() {
        assert_eq!(plus_str("1", "2").unwrap(), "3");
        assert_eq!(minus_str("5", "2").unwrap(), "3");
        assert_eq!(multiply_str("4", "3").unwrap(), "12");
        assert_eq!(plus_str("1.5", "1").unwrap(), "2.5");
    }

    #[test]
    fn test_compare_number_str() {
        assert!(compare_number_str("100", Number::Int(50), true, true));
        assert!(!compare_number_str("10", Number::Int(50), true, true));
        assert!(compare_number_str("50", Number::Int(50), true, true));
        assert!(!compare_number_str("50", Number::Int(50), true, false));
        assert!(compare_number_str("10", Number::Int(50), false, false));
        assert!(!compare_number_str("oops", Number::Int(50), false, true));
    }
}
