//! Parameter values and ordered key/value lists

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared scalar type of a schema key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int64,
    Double,
    String,
    Enum,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int64 => "int64",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// A single parameter value
///
/// `Enum` carries the id of an enumeration entry, not its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Enum(i64),
}

impl ParamValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ParamValue::Bool(_) => ValueType::Bool,
            ParamValue::Int64(_) => ValueType::Int64,
            ParamValue::Double(_) => ValueType::Double,
            ParamValue::String(_) => ValueType::String,
            ParamValue::Enum(_) => ValueType::Enum,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<i64> {
        match self {
            ParamValue::Enum(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int64(v) => write!(f, "{}", v),
            ParamValue::Double(v) => write!(f, "{}", v),
            ParamValue::String(v) => write!(f, "\"{}\"", v),
            ParamValue::Enum(v) => write!(f, "enum({})", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

/// Ordered list of `(key, value)` pairs making up one atomic `set` or the
/// answer to a `get`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamList {
    entries: Vec<(String, ParamValue)>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// First key that appears more than once
    pub fn duplicate_key(&self) -> Option<&str> {
        self.entries
            .iter()
            .enumerate()
            .find(|(i, (key, _))| self.entries[..*i].iter().any(|(k, _)| k == key))
            .map(|(_, (key, _))| key.as_str())
    }

    /// Value for an exact key match
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ParamValue::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ParamValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ParamValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    pub fn get_enum(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ParamValue::as_enum)
    }
}

impl FromIterator<(String, ParamValue)> for ParamList {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ParamList {
    type Item = (String, ParamValue);
    type IntoIter = std::vec::IntoIter<(String, ParamValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors_reject_wrong_type() {
        let list = ParamList::new()
            .with("/a", true)
            .with("/b", 42i64)
            .with("/c", 1.5)
            .with("/d", ParamValue::Enum(3));

        assert_eq!(list.get_bool("/a"), Some(true));
        assert_eq!(list.get_i64("/b"), Some(42));
        assert_eq!(list.get_f64("/c"), Some(1.5));
        assert_eq!(list.get_enum("/d"), Some(3));

        assert_eq!(list.get_f64("/b"), None);
        assert_eq!(list.get_i64("/d"), None);
        assert_eq!(list.get_bool("/missing"), None);
    }

    #[test]
    fn test_duplicate_key_found() {
        let list = ParamList::new().with("/a", 1i64).with("/b", 2i64);
        assert_eq!(list.duplicate_key(), None);

        let list = list.with("/a", 3i64);
        assert_eq!(list.duplicate_key(), Some("/a"));
    }

    #[test]
    fn test_json_shape() {
        let value = ParamValue::Double(2.5);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"double","value":2.5}"#);
    }
}
