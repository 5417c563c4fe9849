//! Path-addressed access into an entry.
//!
//! A [`Field`] names a location inside an entry: a path into the record
//! body (`$.a.b.c`, or bare `a.b.c`; `$` alone is the whole record), a
//! single label (`$labels.key`), or nothing at all (the nil field, which
//! reads as absent and ignores writes).
//!
//! Reads through a missing key, a scalar, or a sequence yield "not
//! present" rather than an error. Writes create intermediate mappings as
//! needed, replacing any scalar in the way; a write whose path traverses
//! a sequence is rejected and leaves the entry unmodified.

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Entry, Value};

/// An addressable path into an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Field {
    /// Addresses nothing. Reads yield `None`; writes are no-ops.
    #[default]
    Nil,
    /// A path into the record body. An empty path is the whole record.
    Record(Vec<String>),
    /// A single label key.
    Label(String),
}

impl Field {
    /// A field addressing the entire record body.
    pub fn record_root() -> Field {
        Field::Record(Vec::new())
    }

    /// A field addressing a path into the record body.
    pub fn record<I, S>(keys: I) -> Field
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Field::Record(keys.into_iter().map(Into::into).collect())
    }

    /// A field addressing a single label.
    pub fn label(key: impl Into<String>) -> Field {
        Field::Label(key.into())
    }

    /// Parses the textual form: `$`, `$.a.b`, `a.b`, or `$labels.key`.
    pub fn parse(s: &str) -> Result<Field, FieldParseError> {
        if s.is_empty() {
            return Err(FieldParseError::Empty);
        }
        if s == "$" {
            return Ok(Field::record_root());
        }
        if let Some(rest) = s.strip_prefix("$labels.") {
            if rest.is_empty() || rest.contains('.') {
                return Err(FieldParseError::InvalidLabel(s.to_string()));
            }
            return Ok(Field::Label(rest.to_string()));
        }
        if s == "$labels" {
            return Err(FieldParseError::InvalidLabel(s.to_string()));
        }
        let path = s.strip_prefix("$.").unwrap_or(s);
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(FieldParseError::InvalidPath(s.to_string()));
        }
        Ok(Field::Record(path.split('.').map(String::from).collect()))
    }

    /// Reads the addressed value, if present.
    pub fn get(&self, entry: &Entry) -> Option<Value> {
        match self {
            Field::Nil => None,
            Field::Label(key) => entry.labels.get(key).cloned().map(Value::String),
            Field::Record(path) => {
                let mut current = &entry.record;
                for key in path {
                    match current {
                        Value::Map(map) => current = map.get(key)?,
                        _ => return None,
                    }
                }
                Some(current.clone())
            }
        }
    }

    /// Writes `value` at the addressed location.
    ///
    /// Intermediate mappings are created as needed; a scalar in the way is
    /// replaced. A write whose path traverses a sequence is rejected: the
    /// entry is left unmodified. Writing the record root replaces the
    /// entire record. Writing a label coerces the value to its string
    /// form. Writing the nil field does nothing.
    pub fn set(&self, entry: &mut Entry, value: Value) {
        match self {
            Field::Nil => {}
            Field::Label(key) => {
                entry.labels.insert(key.clone(), value.to_label_string());
            }
            Field::Record(path) => {
                if path.is_empty() {
                    entry.record = value;
                    return;
                }
                // A sequence can only be met while walking pre-existing
                // values, before the first scalar replacement or key
                // insertion, so bailing here leaves the entry untouched.
                let mut current = &mut entry.record;
                for key in &path[..path.len() - 1] {
                    if matches!(current, Value::Array(_)) {
                        return;
                    }
                    if !matches!(current, Value::Map(_)) {
                        *current = Value::Map(Default::default());
                    }
                    current = match current {
                        Value::Map(map) => map.entry(key.clone()).or_insert(Value::Null),
                        _ => unreachable!(),
                    };
                }
                if matches!(current, Value::Array(_)) {
                    return;
                }
                if !matches!(current, Value::Map(_)) {
                    *current = Value::Map(Default::default());
                }
                if let Value::Map(map) = current {
                    map.insert(path[path.len() - 1].clone(), value);
                }
            }
        }
    }

    /// Removes and returns the addressed value, if present.
    pub fn delete(&self, entry: &mut Entry) -> Option<Value> {
        match self {
            Field::Nil => None,
            Field::Label(key) => entry.labels.remove(key).map(Value::String),
            Field::Record(path) => {
                if path.is_empty() {
                    let old = std::mem::take(&mut entry.record);
                    return if old.is_null() { None } else { Some(old) };
                }
                let mut current = &mut entry.record;
                for key in &path[..path.len() - 1] {
                    current = match current {
                        Value::Map(map) => map.get_mut(key)?,
                        _ => return None,
                    };
                }
                match current {
                    Value::Map(map) => map.remove(&path[path.len() - 1]),
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Nil => write!(f, ""),
            Field::Label(key) => write!(f, "$labels.{key}"),
            Field::Record(path) => {
                if path.is_empty() {
                    write!(f, "$")
                } else {
                    write!(f, "$.{}", path.join("."))
                }
            }
        }
    }
}

/// Errors from parsing the textual field form.
#[derive(Debug, thiserror::Error)]
pub enum FieldParseError {
    #[error("field cannot be empty")]
    Empty,

    #[error("invalid label field '{0}'")]
    InvalidLabel(String),

    #[error("invalid record field '{0}'")]
    InvalidPath(String),
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Field::parse(&s).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn nested_entry() -> Entry {
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), Value::from("leaf"));
        let mut outer = BTreeMap::new();
        outer.insert("a".to_string(), Value::Map(inner));
        Entry::from_record(Value::Map(outer))
    }

    #[test]
    fn parse_forms() {
        assert_eq!(Field::parse("$").expect("root"), Field::record_root());
        assert_eq!(
            Field::parse("$.a.b").expect("dollar path"),
            Field::record(["a", "b"])
        );
        assert_eq!(
            Field::parse("a.b").expect("bare path"),
            Field::record(["a", "b"])
        );
        assert_eq!(
            Field::parse("$labels.key").expect("label"),
            Field::label("key")
        );
        assert!(Field::parse("").is_err());
        assert!(Field::parse("$labels").is_err());
        assert!(Field::parse("$.").is_err());
    }

    #[test]
    fn get_nested() {
        let entry = nested_entry();
        assert_eq!(
            Field::record(["a", "b"]).get(&entry),
            Some(Value::from("leaf"))
        );
        assert_eq!(Field::record(["a", "missing"]).get(&entry), None);
        assert_eq!(Field::record(["a", "b", "deeper"]).get(&entry), None);
    }

    #[test]
    fn get_root_returns_whole_record() {
        let entry = Entry::from_record("scalar");
        assert_eq!(
            Field::record_root().get(&entry),
            Some(Value::from("scalar"))
        );
    }

    #[test]
    fn set_then_get_round_trips() {
        // Property: after set(e, P, V), get(e, P) == Some(V).
        let paths: Vec<Field> = vec![
            Field::record_root(),
            Field::record(["a"]),
            Field::record(["a", "b", "c"]),
            Field::label("source"),
        ];
        for field in paths {
            let mut entry = Entry::new();
            field.set(&mut entry, Value::from("written"));
            assert_eq!(
                field.get(&entry),
                Some(Value::from("written")),
                "round trip failed for {field}"
            );
        }
    }

    #[test]
    fn set_replaces_scalar_in_the_way() {
        let mut entry = Entry::from_record("scalar");
        Field::record(["a", "b"]).set(&mut entry, Value::from("deep"));
        assert_eq!(
            Field::record(["a", "b"]).get(&entry),
            Some(Value::from("deep"))
        );
    }

    #[test]
    fn set_root_replaces_record() {
        let mut entry = nested_entry();
        Field::record_root().set(&mut entry, Value::from("flat"));
        assert_eq!(entry.record, Value::from("flat"));
    }

    #[test]
    fn sequences_are_opaque() {
        let original = Entry::from_record(Value::Map(
            [("seq".to_string(), Value::Array(vec![Value::Int(1)]))]
                .into_iter()
                .collect(),
        ));

        // Reads through a sequence stay absent.
        assert_eq!(Field::record(["seq", "x"]).get(&original), None);

        // A write whose path traverses a sequence is rejected and leaves
        // the entry unmodified.
        let mut entry = original.clone();
        Field::record(["seq", "x"]).set(&mut entry, Value::from("nope"));
        assert_eq!(entry, original);

        let mut deep = original.clone();
        Field::record(["seq", "x", "y"]).set(&mut deep, Value::from("nope"));
        assert_eq!(deep, original);

        // Same when the record root itself is a sequence.
        let root_seq = Entry::from_record(Value::Array(vec![Value::Int(1)]));
        assert_eq!(Field::record(["0"]).get(&root_seq), None);
        let mut entry = root_seq.clone();
        Field::record(["0"]).set(&mut entry, Value::from("nope"));
        assert_eq!(entry, root_seq);

        // Deletes through a sequence are a no-op as well.
        let mut entry = original.clone();
        assert_eq!(Field::record(["seq", "x"]).delete(&mut entry), None);
        assert_eq!(entry, original);
    }

    #[test]
    fn set_replaces_a_sequence_addressed_directly() {
        // Replacing the value AT the path is not traversal; a sequence
        // sitting at the final key is overwritten like any other value.
        let mut entry = Entry::from_record(Value::Map(
            [("seq".to_string(), Value::Array(vec![Value::Int(1)]))]
                .into_iter()
                .collect(),
        ));
        Field::record(["seq"]).set(&mut entry, Value::from("flat"));
        assert_eq!(Field::record(["seq"]).get(&entry), Some(Value::from("flat")));

        // Setting the root replaces the record even when it is a sequence.
        let mut entry = Entry::from_record(Value::Array(vec![Value::Int(1)]));
        Field::record_root().set(&mut entry, Value::from("flat"));
        assert_eq!(entry.record, Value::from("flat"));
    }

    #[test]
    fn delete_returns_removed_value() {
        let mut entry = nested_entry();
        let removed = Field::record(["a", "b"]).delete(&mut entry);
        assert_eq!(removed, Some(Value::from("leaf")));
        assert_eq!(Field::record(["a", "b"]).get(&entry), None);
        assert_eq!(Field::record(["a", "b"]).delete(&mut entry), None);
    }

    #[test]
    fn labels_read_write_delete() {
        let mut entry = Entry::new();
        let field = Field::label("file_name");
        field.set(&mut entry, Value::from("a.log"));
        assert_eq!(entry.labels.get("file_name"), Some(&"a.log".to_string()));
        assert_eq!(field.get(&entry), Some(Value::from("a.log")));
        assert_eq!(field.delete(&mut entry), Some(Value::from("a.log")));
        assert!(entry.labels.is_empty());
    }

    #[test]
    fn label_write_coerces_to_string() {
        let mut entry = Entry::new();
        Field::label("count").set(&mut entry, Value::Int(7));
        assert_eq!(entry.labels.get("count"), Some(&"7".to_string()));
    }

    #[test]
    fn nil_field_is_inert() {
        let mut entry = Entry::from_record("body");
        assert_eq!(Field::Nil.get(&entry), None);
        Field::Nil.set(&mut entry, Value::from("ignored"));
        assert_eq!(entry.record, Value::from("body"));
        assert_eq!(Field::Nil.delete(&mut entry), None);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for text in ["$", "$.a.b", "$labels.key"] {
            let field = Field::parse(text).expect("parses");
            assert_eq!(field.to_string(), text);
        }
    }

    #[test]
    fn deserializes_from_config_string() {
        let field: Field = serde_yaml::from_str("\"$.message\"").expect("valid");
        assert_eq!(field, Field::record(["message"]));
    }
}
