//! Characteristic values and matcher evaluation.
//!
//! Resource definitions describe themselves with an open map of characteristics. Requirements
//! select resources with a matcher map of the same shape. Matching rules, per matcher key:
//!
//! - a string starting with `>`, `<`, `>=` or `<=` compares numerically against the resource
//!   value, which must be a number;
//! - a list is a subset test against the resource's list;
//! - anything else is exact equality.
//!
//! All matcher keys must match. Resource keys the matcher does not mention are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Conventional key holding the capabilities a resource advertises.
pub const CAPABILITIES_KEY: &str = "capabilities";

/// A single characteristic value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CharacteristicValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Free text (also carries comparator expressions in matchers).
    Text(String),
    /// List of strings (capabilities, certifications, ...).
    List(Vec<String>),
    /// Any other value (null, nested maps, mixed lists). Kept verbatim, never matches.
    Other(serde_json::Value),
}

impl CharacteristicValue {
    /// Returns the numeric value, if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CharacteristicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for CharacteristicValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CharacteristicValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for CharacteristicValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for CharacteristicValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CharacteristicValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<&str>> for CharacteristicValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for CharacteristicValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// An open characteristics map (also used as a matcher).
pub type Characteristics = BTreeMap<String, CharacteristicValue>;

/// Builds a characteristics map from key/value pairs.
pub fn characteristics<I, K, V>(pairs: I) -> Characteristics
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<CharacteristicValue>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Numeric comparison operator of a matcher expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
}

impl Comparator {
    /// Applies the comparison `actual <op> threshold`.
    #[must_use]
    pub fn holds(self, actual: f64, threshold: f64) -> bool {
        match self {
            Self::Greater => actual > threshold,
            Self::GreaterOrEqual => actual >= threshold,
            Self::Less => actual < threshold,
            Self::LessOrEqual => actual <= threshold,
        }
    }
}

/// Parses a comparator expression such as `">2"` or `"<= 10.5"`.
///
/// Returns `None` when the text has no comparator prefix or the remainder is not a number.
#[must_use]
pub fn parse_comparator(expr: &str) -> Option<(Comparator, f64)> {
    let expr = expr.trim();
    // two-character operators first so ">=" is not read as ">" followed by "=..."
    let (op, rest) = if let Some(rest) = expr.strip_prefix(">=") {
        (Comparator::GreaterOrEqual, rest)
    } else if let Some(rest) = expr.strip_prefix("<=") {
        (Comparator::LessOrEqual, rest)
    } else if let Some(rest) = expr.strip_prefix('>') {
        (Comparator::Greater, rest)
    } else if let Some(rest) = expr.strip_prefix('<') {
        (Comparator::Less, rest)
    } else {
        return None;
    };
    rest.trim().parse::<f64>().ok().map(|threshold| (op, threshold))
}

/// Checks a single matcher value against the resource's value for the same key.
#[must_use]
pub fn value_matches(expected: &CharacteristicValue, actual: Option<&CharacteristicValue>) -> bool {
    match expected {
        CharacteristicValue::Text(expr) => {
            if let Some((op, threshold)) = parse_comparator(expr) {
                return actual
                    .and_then(CharacteristicValue::as_number)
                    .is_some_and(|value| op.holds(value, threshold));
            }
            actual == Some(expected)
        }
        CharacteristicValue::List(required) => match actual {
            Some(CharacteristicValue::List(offered)) => {
                required.iter().all(|item| offered.contains(item))
            }
            _ => false,
        },
        CharacteristicValue::Number(n) => {
            actual
                .and_then(CharacteristicValue::as_number)
                .is_some_and(|value| (value - *n).abs() < f64::EPSILON)
        }
        CharacteristicValue::Bool(_) => actual == Some(expected),
        CharacteristicValue::Other(_) => false,
    }
}

/// Returns `true` when every key of `matcher` is satisfied by `characteristics`.
#[must_use]
pub fn matches(matcher: &Characteristics, characteristics: &Characteristics) -> bool {
    matcher.iter().all(|(key, expected)| value_matches(expected, characteristics.get(key)))
}

/// Extracts the capability names advertised under [`CAPABILITIES_KEY`].
#[must_use]
pub fn advertised_capabilities(characteristics: &Characteristics) -> Vec<String> {
    match characteristics.get(CAPABILITIES_KEY) {
        Some(CharacteristicValue::List(items)) => items.clone(),
        _ => Vec::new(),
    }
}
