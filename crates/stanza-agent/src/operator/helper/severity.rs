//! The severity mapping DSL.
//!
//! A mapping from severity (named or integer) to one or more matcher
//! values. Matchers come in four shapes:
//!
//! - a scalar (string compared case-insensitively, integer, or bytes),
//! - a list of scalars (any-equal),
//! - a `{min, max}` inclusive numeric range (out-of-order bounds are
//!   swapped),
//! - the shorthand `"Nxx"` with N in 1..=5, covering `[N*100, N*100+99]`.
//!
//! A base mapping seeds the common English level names; `mapping_set: none`
//! disables it. Lookup walks matchers in declaration order (custom entries
//! before base entries) and assigns the first hit; misses yield
//! [`Severity::DEFAULT`].

use serde::Deserialize;

use crate::entry::{Severity, Value};

/// Errors from building or evaluating a severity mapping.
#[derive(Debug, thiserror::Error)]
pub enum SeverityMapError {
    #[error("unsupported severity mapping key: {0}")]
    InvalidKey(String),

    #[error("unsupported value in severity mapping: {0}")]
    InvalidMatcher(String),

    #[error("cannot parse sample value for severity mapping")]
    UnparseableSample,
}

/// Which base mapping seeds the mapper before custom entries apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSet {
    /// Common English level names mapped to their standard severities.
    #[default]
    Default,
    /// No seeded entries.
    None,
}

/// Declarative configuration for a [`SeverityMapper`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeverityMapperConfig {
    /// Custom severity -> matcher(s) entries, evaluated before the base
    /// mapping.
    #[serde(default)]
    pub mapping: serde_yaml::Mapping,

    /// Base mapping selection.
    #[serde(default, alias = "mappingSet")]
    pub mapping_set: MappingSet,
}

impl SeverityMapperConfig {
    /// Validates the mapping and compiles it into a mapper.
    pub fn build(&self) -> Result<SeverityMapper, SeverityMapError> {
        let mut entries = Vec::new();
        for (key, value) in &self.mapping {
            let severity = parse_severity_key(key)?;
            push_matchers(&mut entries, severity, value)?;
        }
        if self.mapping_set == MappingSet::Default {
            for (severity, names) in BASE_MAPPING {
                for name in *names {
                    entries.push((Matcher::Text(name.to_string()), *severity));
                }
            }
        }
        Ok(SeverityMapper { entries })
    }
}

const BASE_MAPPING: &[(Severity, &[&str])] = &[
    (Severity::TRACE, &["trace"]),
    (Severity::DEBUG, &["debug"]),
    (Severity::INFO, &["info"]),
    (Severity::NOTICE, &["notice"]),
    (Severity::WARNING, &["warning", "warn"]),
    (Severity::ERROR, &["error", "err"]),
    (Severity::CRITICAL, &["critical", "crit"]),
    (Severity::ALERT, &["alert"]),
    (Severity::EMERGENCY, &["emergency", "fatal", "panic"]),
];

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    /// Case-insensitive text equality; stored lowercased.
    Text(String),
    Int(i64),
    /// Inclusive numeric range.
    Range(i64, i64),
}

/// A compiled severity mapping.
#[derive(Debug, Clone)]
pub struct SeverityMapper {
    entries: Vec<(Matcher, Severity)>,
}

impl SeverityMapper {
    /// Maps a sample value to its severity; misses yield `DEFAULT`.
    pub fn lookup(&self, sample: &Value) -> Result<Severity, SeverityMapError> {
        let key = SampleKey::from_value(sample)?;
        for (matcher, severity) in &self.entries {
            let hit = match matcher {
                Matcher::Text(text) => key.text == *text,
                Matcher::Int(i) => key.int == Some(*i),
                Matcher::Range(min, max) => {
                    key.int.is_some_and(|v| v >= *min && v <= *max)
                }
            };
            if hit {
                return Ok(*severity);
            }
        }
        Ok(Severity::DEFAULT)
    }
}

/// The comparable forms of a sample value.
struct SampleKey {
    text: String,
    int: Option<i64>,
}

impl SampleKey {
    fn from_value(value: &Value) -> Result<SampleKey, SeverityMapError> {
        match value {
            Value::String(s) => Ok(SampleKey {
                text: s.to_ascii_lowercase(),
                int: s.trim().parse::<i64>().ok(),
            }),
            Value::Int(i) => Ok(SampleKey {
                text: i.to_string(),
                int: Some(*i),
            }),
            Value::Bytes(b) => {
                let text = String::from_utf8_lossy(b).to_ascii_lowercase();
                let int = text.trim().parse::<i64>().ok();
                Ok(SampleKey { text, int })
            }
            Value::Bool(b) => Ok(SampleKey {
                text: b.to_string(),
                int: None,
            }),
            _ => Err(SeverityMapError::UnparseableSample),
        }
    }
}

fn parse_severity_key(key: &serde_yaml::Value) -> Result<Severity, SeverityMapError> {
    match key {
        serde_yaml::Value::Number(n) => n
            .as_i64()
            .and_then(Severity::from_int)
            .ok_or_else(|| SeverityMapError::InvalidKey(n.to_string())),
        serde_yaml::Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                return Severity::from_int(i)
                    .ok_or_else(|| SeverityMapError::InvalidKey(s.clone()));
            }
            Severity::from_name(s).ok_or_else(|| SeverityMapError::InvalidKey(s.clone()))
        }
        other => Err(SeverityMapError::InvalidKey(format!("{other:?}"))),
    }
}

fn push_matchers(
    entries: &mut Vec<(Matcher, Severity)>,
    severity: Severity,
    value: &serde_yaml::Value,
) -> Result<(), SeverityMapError> {
    match value {
        serde_yaml::Value::Sequence(seq) => {
            for element in seq {
                if matches!(element, serde_yaml::Value::Sequence(_)) {
                    return Err(SeverityMapError::InvalidMatcher(
                        "nested list".to_string(),
                    ));
                }
                push_matchers(entries, severity, element)?;
            }
            Ok(())
        }
        other => {
            entries.push((parse_scalar_matcher(other)?, severity));
            Ok(())
        }
    }
}

fn parse_scalar_matcher(value: &serde_yaml::Value) -> Result<Matcher, SeverityMapError> {
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(range) = parse_nxx(s) {
                return Ok(range);
            }
            Ok(Matcher::Text(s.to_ascii_lowercase()))
        }
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Matcher::Int(i)),
            None => Err(SeverityMapError::InvalidMatcher(format!(
                "float literal {n}"
            ))),
        },
        serde_yaml::Value::Mapping(map) => parse_range(map),
        other => Err(SeverityMapError::InvalidMatcher(format!("{other:?}"))),
    }
}

/// Parses the `"Nxx"` shorthand, N in 1..=5.
fn parse_nxx(s: &str) -> Option<Matcher> {
    let mut chars = s.chars();
    let n = chars.next()?.to_digit(10)?;
    if !(1..=5).contains(&n) || chars.as_str() != "xx" {
        return None;
    }
    let base = (n as i64) * 100;
    Some(Matcher::Range(base, base + 99))
}

fn parse_range(map: &serde_yaml::Mapping) -> Result<Matcher, SeverityMapError> {
    let min = range_bound(map, "min")?;
    let max = range_bound(map, "max")?;
    if map.len() != 2 {
        return Err(SeverityMapError::InvalidMatcher(
            "range mapping must contain exactly min and max".to_string(),
        ));
    }
    // min > max is silently normalized by swapping.
    if min > max {
        Ok(Matcher::Range(max, min))
    } else {
        Ok(Matcher::Range(min, max))
    }
}

fn range_bound(map: &serde_yaml::Mapping, key: &str) -> Result<i64, SeverityMapError> {
    map.get(key)
        .and_then(serde_yaml::Value::as_i64)
        .ok_or_else(|| {
            SeverityMapError::InvalidMatcher(format!("range mapping missing integer `{key}`"))
        })
}
