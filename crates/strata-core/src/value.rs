//! Unified value representation for step inputs and outputs.
//!
//! Every parameter literal and every dataset in the catalog is a [`Value`].
//! Maps are ordered so that content fingerprints are stable across runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Numeric value type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(i) => write!(f, "{}", i),
            Number::Float(fl) => write!(f, "{}", fl),
        }
    }
}

impl Number {
    /// Gets the value as an f64.
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Integer(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    /// Gets the value as an i64, if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Number::Integer(i) => Some(*i),
            Number::Float(_) => None,
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Integer(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

/// A unified value type for step parameters and catalog datasets.
///
/// Supports primitives (null, bool, number, string) and structured data
/// (list, map). Serialized untagged, so YAML/JSON literals map directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value (integer or float).
    Number(Number),
    /// String value.
    String(String),
    /// List of values.
    List(Vec<Value>),
    /// Key-value map, ordered by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Checks if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to get the value as a number.
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Attempts to get the value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(Number::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to get the value as an f64 (integers widen).
    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(Number::as_f64)
    }

    /// Attempts to get the value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to get the value as a list reference.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Attempts to get the value as a map reference.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Converts the value into a JSON value.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        serde_json::to_value(self).map_err(|e| ValueError::Serialization(e.to_string()))
    }

    /// Builds a value from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, ValueError> {
        serde_json::from_value(json.clone()).map_err(|e| ValueError::Serialization(e.to_string()))
    }

    /// Content fingerprint: BLAKE3 over a canonical encoding, truncated to
    /// 32 hex characters. Equal values always produce equal fingerprints;
    /// map ordering cannot leak in because maps are ordered.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        self.feed(&mut hasher);
        let hash = hasher.finalize();
        hash.to_hex()[..32].to_string()
    }

    fn feed(&self, hasher: &mut blake3::Hasher) {
        match self {
            Value::Null => {
                hasher.update(b"n");
            }
            Value::Bool(b) => {
                hasher.update(if *b { b"b1" } else { b"b0" });
            }
            Value::Number(Number::Integer(i)) => {
                hasher.update(b"i");
                hasher.update(&i.to_le_bytes());
            }
            Value::Number(Number::Float(f)) => {
                hasher.update(b"f");
                hasher.update(&f.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                hasher.update(b"s");
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::List(items) => {
                hasher.update(b"l");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
            Value::Map(map) => {
                hasher.update(b"m");
                hasher.update(&(map.len() as u64).to_le_bytes());
                for (k, v) in map {
                    hasher.update(&(k.len() as u64).to_le_bytes());
                    hasher.update(k.as_bytes());
                    v.feed(hasher);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    /// Renders the JSON form; falls back to debug for unserializable floats.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::Integer(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::Float(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}
