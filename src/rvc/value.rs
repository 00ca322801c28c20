// src/rvc/value.rs
//
// Decoded field values and the per-frame decoded message map.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Text form of the all-ones "not available" sentinel.
pub const NOT_AVAILABLE: &str = "n/a";

/// A single decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    /// Raw bit pattern of a bitfield, most significant bit first (e.g. "01").
    Bits(String),
    Text(String),
    /// Raw bits were all ones.
    NotAvailable,
}

impl FieldValue {
    pub fn is_available(&self) -> bool {
        !matches!(self, FieldValue::NotAvailable)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Unsigned(_) | FieldValue::Signed(_) | FieldValue::Float(_)
        )
    }

    /// Numeric view. Bitfields are read as their binary value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Signed(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bits(b) => u64::from_str_radix(b, 2).ok().map(|v| v as f64),
            FieldValue::Text(_) | FieldValue::NotAvailable => None,
        }
    }

    /// Integer view. Floats only convert when they carry no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Unsigned(v) => i64::try_from(*v).ok(),
            FieldValue::Signed(v) => Some(*v),
            FieldValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            FieldValue::Bits(b) => i64::from_str_radix(b, 2).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Bits(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical string form used for cross-type comparisons.
    ///
    /// Integral floats print without a fraction so `32.0` and `32` agree.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Unsigned(v) => v.to_string(),
            FieldValue::Signed(v) => v.to_string(),
            FieldValue::Float(v) => format_number(*v),
            FieldValue::Bits(s) | FieldValue::Text(s) => s.clone(),
            FieldValue::NotAvailable => NOT_AVAILABLE.to_string(),
        }
    }
}

/// Format a float the way it is published: integral values without a fraction.
pub fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            other => f.write_str(&other.canonical()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Unsigned(v) => serializer.serialize_u64(*v),
            FieldValue::Signed(v) => serializer.serialize_i64(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Bits(s) | FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::NotAvailable => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Unsigned(v)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Unsigned(v as u64)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Unsigned(v as u64)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Signed(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Field name to value map used as encoder input.
pub type FieldMap = HashMap<String, FieldValue>;

/// Build a [`FieldMap`] from `(name, value)` pairs.
pub fn field_map<I, K, V>(pairs: I) -> FieldMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// One decoded frame: schema fields plus metadata keys
/// (`name`, `dgn`, `source_id`, `priority`, `data`, `arbitration_id`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedMessage {
    fields: HashMap<String, FieldValue>,
}

impl DecodedMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Schema name of the DGN, e.g. `DC_DIMMER_STATUS_3`.
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(FieldValue::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_i64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    /// Enum label companion of `key` (`<key>_definition`).
    pub fn definition(&self, key: &str) -> Option<&str> {
        self.text(&format!("{}_definition", key))
    }
}

impl Serialize for DecodedMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Sorted keys keep log lines and unhandled payloads stable.
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        let mut map = serializer.serialize_map(Some(keys.len()))?;
        for key in keys {
            map.serialize_entry(key, &self.fields[key])?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_forms() {
        assert_eq!(FieldValue::Unsigned(32).canonical(), "32");
        assert_eq!(FieldValue::Float(32.0).canonical(), "32");
        assert_eq!(FieldValue::Float(54.7).canonical(), "54.7");
        assert_eq!(FieldValue::Signed(-4).canonical(), "-4");
        assert_eq!(FieldValue::NotAvailable.canonical(), "n/a");
        assert_eq!(FieldValue::Bits("01".into()).canonical(), "01");
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(FieldValue::Bits("11".into()).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Float(2.5).as_i64(), None);
        assert_eq!(FieldValue::Float(2.0).as_i64(), Some(2));
        assert_eq!(FieldValue::NotAvailable.as_f64(), None);
        assert!(!FieldValue::NotAvailable.is_available());
    }

    #[test]
    fn test_message_serializes_sorted() {
        let mut msg = DecodedMessage::new();
        msg.insert("name", FieldValue::from("DC_DIMMER_STATUS_3"));
        msg.insert("instance", FieldValue::Unsigned(32));
        msg.insert("delay", FieldValue::NotAvailable);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"delay":"n/a","instance":32,"name":"DC_DIMMER_STATUS_3"}"#
        );
    }

    #[test]
    fn test_definition_lookup() {
        let mut msg = DecodedMessage::new();
        msg.insert("command", FieldValue::Unsigned(5));
        msg.insert("command_definition", FieldValue::from("toggle"));
        assert_eq!(msg.definition("command"), Some("toggle"));
        assert_eq!(msg.definition("missing"), None);
    }
}
