// src/dispatch/predicate.rs
//
// Match predicates: ordered key -> expected value pairs tested against a
// decoded message. Every key must be present and equal; extra message keys are
// ignored. Comparison is on raw values, never on enum labels.

use std::fmt;

use crate::rvc::value::{format_number, DecodedMessage, FieldValue};

/// Expected value of one predicate term.
#[derive(Clone, Debug, PartialEq)]
pub enum Expected {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Expected {
    /// Numbers compare numerically against numeric values; everything else
    /// compares by canonical string form (`32`, `"32"` and `32.0` all agree).
    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Expected::Int(e) if value.is_numeric() => match value {
                FieldValue::Unsigned(v) => i64::try_from(*v).map_or(false, |v| v == *e),
                FieldValue::Signed(v) => v == e,
                FieldValue::Float(v) => *v == *e as f64,
                _ => false,
            },
            Expected::Float(e) if value.is_numeric() => value.as_f64() == Some(*e),
            _ => self.canonical() == value.canonical(),
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            Expected::Int(v) => v.to_string(),
            Expected::Float(v) => format_number(*v),
            Expected::Text(s) => s.trim().to_string(),
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for Expected {
    fn from(v: i64) -> Self {
        Expected::Int(v)
    }
}

impl From<u8> for Expected {
    fn from(v: u8) -> Self {
        Expected::Int(v as i64)
    }
}

impl From<u32> for Expected {
    fn from(v: u32) -> Self {
        Expected::Int(v as i64)
    }
}

impl From<i32> for Expected {
    fn from(v: i32) -> Self {
        Expected::Int(v as i64)
    }
}

impl From<f64> for Expected {
    fn from(v: f64) -> Self {
        Expected::Float(v)
    }
}

impl From<&str> for Expected {
    fn from(v: &str) -> Self {
        Expected::Text(v.to_string())
    }
}

impl From<String> for Expected {
    fn from(v: String) -> Self {
        Expected::Text(v)
    }
}

/// Ordered set of required key/value pairs. An empty predicate matches every message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchPredicate {
    terms: Vec<(String, Expected)>,
}

impl MatchPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term. A repeated key replaces the earlier expectation in place.
    pub fn with(mut self, key: impl Into<String>, expected: impl Into<Expected>) -> Self {
        self.insert(key, expected);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, expected: impl Into<Expected>) {
        let key = key.into();
        let expected = expected.into();
        match self.terms.iter_mut().find(|(k, _)| *k == key) {
            Some(term) => term.1 = expected,
            None => self.terms.push((key, expected)),
        }
    }

    /// Predicate on the schema name, the usual first term.
    pub fn named(name: &str) -> Self {
        Self::new().with("name", name)
    }

    pub fn get(&self, key: &str) -> Option<&Expected> {
        self.terms.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn terms(&self) -> &[(String, Expected)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Short-circuits on the first failing term.
    pub fn matches(&self, message: &DecodedMessage) -> bool {
        self.terms.iter().all(|(key, expected)| {
            message
                .get(key)
                .map_or(false, |value| expected.matches(value))
        })
    }
}

impl fmt::Display for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        f.write_str("}")
    }
}

pub fn matches(predicate: &MatchPredicate, message: &DecodedMessage) -> bool {
    predicate.matches(message)
}
