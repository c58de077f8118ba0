//! Parameter schema: the typed key tree every component is built from

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::keys;
use crate::store::StoreError;
use crate::value::{ParamValue, ValueType};

/// Identifier of the sonar key layout
pub const SONAR_SCHEMA_ID: i64 = 0x5EA5_0A12;

/// Current layout version; only `version / 100` must match between peers
pub const SONAR_SCHEMA_VERSION: i64 = 20_100;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema mismatch: expected id {expected_id} v{expected_version}, got id {id} v{version}")]
    Mismatch {
        expected_id: i64,
        id: i64,
        expected_version: i64,
        version: i64,
    },
    #[error("Schema is missing key {0}")]
    MissingKey(String),
    #[error("Failed to decode schema: {0}")]
    Json(#[from] serde_json::Error),
}

/// Whether a key may be written by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    ReadOnly,
    #[default]
    ReadWrite,
}

/// One entry of an enumeration type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub id: i64,
    pub name: String,
}

impl EnumValue {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Declaration of a single key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub value_type: ValueType,
    pub default: ParamValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumValue>,
    #[serde(default)]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl KeyDescriptor {
    pub fn new(default: ParamValue) -> Self {
        Self {
            value_type: default.value_type(),
            default,
            min: None,
            max: None,
            enum_values: Vec::new(),
            access: Access::ReadWrite,
            description: None,
        }
    }

    pub fn bool(default: bool) -> Self {
        Self::new(ParamValue::Bool(default))
    }

    pub fn int(default: i64) -> Self {
        Self::new(ParamValue::Int64(default))
    }

    pub fn double(default: f64) -> Self {
        Self::new(ParamValue::Double(default))
    }

    pub fn string(default: impl Into<String>) -> Self {
        Self::new(ParamValue::String(default.into()))
    }

    pub fn enumeration(default: i64, values: Vec<EnumValue>) -> Self {
        let mut desc = Self::new(ParamValue::Enum(default));
        desc.enum_values = values;
        desc
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Check type, bounds and enum membership of a candidate value
    pub fn check_value(&self, key: &str, value: &ParamValue) -> Result<(), StoreError> {
        if value.value_type() != self.value_type {
            return Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected: self.value_type,
                actual: value.value_type(),
            });
        }

        let numeric = match value {
            ParamValue::Int64(v) => Some(*v as f64),
            ParamValue::Double(v) => Some(*v),
            _ => None,
        };
        if let Some(v) = numeric {
            let below = self.min.map_or(false, |min| v < min);
            let above = self.max.map_or(false, |max| v > max);
            if below || above || v.is_nan() {
                return Err(StoreError::OutOfRange {
                    key: key.to_string(),
                    value: v,
                });
            }
        }

        if let ParamValue::Enum(id) = value {
            if !self.enum_values.iter().any(|e| e.id == *id) {
                return Err(StoreError::OutOfRange {
                    key: key.to_string(),
                    value: *id as f64,
                });
            }
        }

        Ok(())
    }

    /// Enum id for an entry name
    pub fn enum_id(&self, name: &str) -> Option<i64> {
        self.enum_values
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
    }

    /// Entry name for an enum id
    pub fn enum_name(&self, id: i64) -> Option<&str> {
        self.enum_values
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }
}

/// The complete key tree of a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub keys: BTreeMap<String, KeyDescriptor>,
}

impl Schema {
    /// Empty schema carrying only the identification keys
    pub fn new(id: i64, version: i64) -> Self {
        let mut schema = Self::default();
        schema.insert(keys::SCHEMA_ID, KeyDescriptor::int(id).read_only());
        schema.insert(keys::SCHEMA_VERSION, KeyDescriptor::int(version).read_only());
        schema
    }

    /// Schema with the sonar layout identification
    pub fn sonar() -> Self {
        Self::new(SONAR_SCHEMA_ID, SONAR_SCHEMA_VERSION)
    }

    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn insert(&mut self, key: impl Into<String>, desc: KeyDescriptor) {
        self.keys.insert(key.into(), desc);
    }

    pub fn remove(&mut self, key: &str) -> Option<KeyDescriptor> {
        self.keys.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&KeyDescriptor> {
        self.keys.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All keys under a path prefix
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.keys
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.as_str())
    }

    pub fn id(&self) -> Option<i64> {
        self.default_i64(keys::SCHEMA_ID)
    }

    pub fn version(&self) -> Option<i64> {
        self.default_i64(keys::SCHEMA_VERSION)
    }

    /// Default value of an integer key (capability masks, data ids)
    pub fn default_i64(&self, key: &str) -> Option<i64> {
        self.keys.get(key).and_then(|d| d.default.as_i64())
    }

    pub fn default_f64(&self, key: &str) -> Option<f64> {
        self.keys.get(key).and_then(|d| d.default.as_f64())
    }

    /// Reject schemas of a different layout or major version
    pub fn check(&self, expected_id: i64, expected_version: i64) -> Result<(), SchemaError> {
        let id = self
            .id()
            .ok_or_else(|| SchemaError::MissingKey(keys::SCHEMA_ID.to_string()))?;
        let version = self
            .version()
            .ok_or_else(|| SchemaError::MissingKey(keys::SCHEMA_VERSION.to_string()))?;

        if id != expected_id || version / 100 != expected_version / 100 {
            return Err(SchemaError::Mismatch {
                expected_id,
                id,
                expected_version,
                version,
            });
        }
        Ok(())
    }

    /// Shorthand for [`Schema::check`] against the sonar layout
    pub fn check_sonar(&self) -> Result<(), SchemaError> {
        self.check(SONAR_SCHEMA_ID, SONAR_SCHEMA_VERSION)
    }

    /// Validate a write from a client
    pub fn validate(&self, key: &str, value: &ParamValue) -> Result<(), StoreError> {
        let desc = self
            .keys
            .get(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
        if desc.access == Access::ReadOnly {
            return Err(StoreError::ReadOnly(key.to_string()));
        }
        desc.check_value(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_accepts_same_major_version() {
        let schema = Schema::new(SONAR_SCHEMA_ID, SONAR_SCHEMA_VERSION + 42);
        assert!(schema.check_sonar().is_ok());
    }

    #[test]
    fn test_check_rejects_other_major_version() {
        let schema = Schema::new(SONAR_SCHEMA_ID, SONAR_SCHEMA_VERSION + 100);
        assert!(matches!(schema.check_sonar(), Err(SchemaError::Mismatch { .. })));
    }

    #[test]
    fn test_check_rejects_other_id() {
        let schema = Schema::new(SONAR_SCHEMA_ID + 1, SONAR_SCHEMA_VERSION);
        assert!(matches!(schema.check_sonar(), Err(SchemaError::Mismatch { .. })));
    }

    #[test]
    fn test_check_requires_id_keys() {
        let schema = Schema::default();
        assert!(matches!(schema.check_sonar(), Err(SchemaError::MissingKey(_))));
    }

    #[test]
    fn test_validate() {
        let mut schema = Schema::sonar();
        schema.insert("/gain", KeyDescriptor::double(0.0).range(-20.0, 80.0));
        schema.insert(
            "/mode",
            KeyDescriptor::enumeration(1, vec![EnumValue::new(1, "a"), EnumValue::new(2, "b")]),
        );

        assert!(schema.validate("/gain", &ParamValue::Double(10.0)).is_ok());
        assert!(matches!(
            schema.validate("/gain", &ParamValue::Double(100.0)),
            Err(StoreError::OutOfRange { .. })
        ));
        assert!(matches!(
            schema.validate("/gain", &ParamValue::Int64(1)),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            schema.validate("/mode", &ParamValue::Enum(3)),
            Err(StoreError::OutOfRange { .. })
        ));
        assert!(matches!(
            schema.validate(keys::SCHEMA_ID, &ParamValue::Int64(1)),
            Err(StoreError::ReadOnly(_))
        ));
        assert!(matches!(
            schema.validate("/nope", &ParamValue::Bool(true)),
            Err(StoreError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_keys_with_prefix() {
        let mut schema = Schema::sonar();
        schema.insert("/sources/a/x", KeyDescriptor::bool(false));
        schema.insert("/sources/a/y", KeyDescriptor::bool(false));
        schema.insert("/sources/b/x", KeyDescriptor::bool(false));
        let keys: Vec<_> = schema.keys_with_prefix("/sources/a/").collect();
        assert_eq!(keys, vec!["/sources/a/x", "/sources/a/y"]);
    }

    #[test]
    fn test_json_round_trip_keeps_enum_entries() {
        let mut schema = Schema::sonar();
        schema.insert(
            "/mode",
            KeyDescriptor::enumeration(2, vec![EnumValue::new(1, "a"), EnumValue::new(2, "b")]),
        );
        let json = serde_json::to_string(&schema).unwrap();
        let parsed = Schema::from_json(&json).unwrap();
        assert_eq!(parsed.get("/mode").unwrap().enum_name(2), Some("b"));
        assert!(parsed.check_sonar().is_ok());
    }
}
