//! The in-memory log record and its addressing primitives.
//!
//! An [`Entry`] is one log record flowing through the pipeline: a timestamp,
//! a severity, a free-form record body, and a flat set of string labels for
//! out-of-band metadata (file name, file path, annotations).
//!
//! Entries are created by input operators, forwarded through the graph, and
//! dropped after the terminal sink returns. When an operator fans out to
//! multiple outputs, every output after the first receives its own clone, so
//! downstream mutation never corrupts a sibling branch.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod field;
pub mod severity;

pub use field::Field;
pub use severity::Severity;

/// The body of a log record.
///
/// Either a scalar (string, integer, float, boolean, bytes), a mapping with
/// string keys, or a sequence, nested arbitrarily. This is the open shape
/// that parsers refine and sinks serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value. The record of a freshly created entry.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// UTF-8 string scalar.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Mapping from string keys to values.
    Map(BTreeMap<String, Value>),
    /// Raw byte scalar. Never produced by deserialization; constructed by
    /// operators that carry undecoded data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the string slice if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders a scalar as the string form used for label values.
    ///
    /// Mappings and sequences fall back to their JSON encoding so that a
    /// label write never silently loses data.
    pub fn to_label_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Wall-clock time of the record. Defaults to creation time.
    pub timestamp: DateTime<Utc>,
    /// Severity in `[0, 100]`. Defaults to [`Severity::DEFAULT`].
    #[serde(default)]
    pub severity: Severity,
    /// Flat out-of-band metadata. Keys are unique, order is irrelevant.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// The record body.
    #[serde(default)]
    pub record: Value,
}

impl Entry {
    /// Creates an empty entry stamped with the current time.
    pub fn new() -> Self {
        Entry {
            timestamp: Utc::now(),
            severity: Severity::DEFAULT,
            labels: HashMap::new(),
            record: Value::Null,
        }
    }

    /// Creates an entry whose record is the given value.
    pub fn from_record(record: impl Into<Value>) -> Self {
        let mut entry = Entry::new();
        entry.record = record.into();
        entry
    }

    /// Reads the value addressed by `field`, if present.
    pub fn get(&self, field: &Field) -> Option<Value> {
        field.get(self)
    }

    /// Writes `value` at the path addressed by `field`, creating
    /// intermediate mappings as needed.
    pub fn set(&mut self, field: &Field, value: impl Into<Value>) {
        field.set(self, value.into());
    }

    /// Removes and returns the value addressed by `field`, if present.
    pub fn delete(&mut self, field: &Field) -> Option<Value> {
        field.delete(self)
    }
}

impl Default for Entry {
    fn default() -> Self {
        Entry::new()
    }
}
