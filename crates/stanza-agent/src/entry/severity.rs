//! Severity levels.
//!
//! Severity is an integer in `[0, 100]` with named anchor points every ten
//! units. Ordering is numeric; custom in-between levels are legal and flow
//! through the pipeline untouched.

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A log severity in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Severity(pub u8);

impl Severity {
    /// Unknown or unset severity.
    pub const DEFAULT: Severity = Severity(0);
    pub const TRACE: Severity = Severity(10);
    pub const DEBUG: Severity = Severity(20);
    pub const INFO: Severity = Severity(30);
    pub const NOTICE: Severity = Severity(40);
    pub const WARNING: Severity = Severity(50);
    pub const ERROR: Severity = Severity(60);
    pub const CRITICAL: Severity = Severity(70);
    pub const ALERT: Severity = Severity(80);
    pub const EMERGENCY: Severity = Severity(90);

    /// Parses a named level, case-insensitively. Common aliases (`warn`,
    /// `err`, `crit`, `fatal`, `panic`) map onto their anchor levels.
    pub fn from_name(name: &str) -> Option<Severity> {
        match name.to_ascii_lowercase().as_str() {
            "default" => Some(Severity::DEFAULT),
            "trace" => Some(Severity::TRACE),
            "debug" => Some(Severity::DEBUG),
            "info" => Some(Severity::INFO),
            "notice" => Some(Severity::NOTICE),
            "warning" | "warn" => Some(Severity::WARNING),
            "error" | "err" => Some(Severity::ERROR),
            "critical" | "crit" => Some(Severity::CRITICAL),
            "alert" => Some(Severity::ALERT),
            "emergency" | "fatal" | "panic" => Some(Severity::EMERGENCY),
            _ => None,
        }
    }

    /// Validates an integer level.
    pub fn from_int(value: i64) -> Option<Severity> {
        if (0..=100).contains(&value) {
            Some(Severity(value as u8))
        } else {
            None
        }
    }

    /// The anchor name for this level, if it sits on one.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Severity::DEFAULT => Some("default"),
            Severity::TRACE => Some("trace"),
            Severity::DEBUG => Some("debug"),
            Severity::INFO => Some("info"),
            Severity::NOTICE => Some("notice"),
            Severity::WARNING => Some("warning"),
            Severity::ERROR => Some("error"),
            Severity::CRITICAL => Some("critical"),
            Severity::ALERT => Some("alert"),
            Severity::EMERGENCY => Some("emergency"),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::Number(n) => {
                let i = n.as_i64().ok_or_else(|| {
                    DeError::custom(format!("severity must be an integer, got {n}"))
                })?;
                Severity::from_int(i)
                    .ok_or_else(|| DeError::custom(format!("severity {i} out of range [0, 100]")))
            }
            serde_yaml::Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    return Severity::from_int(i).ok_or_else(|| {
                        DeError::custom(format!("severity {i} out of range [0, 100]"))
                    });
                }
                Severity::from_name(&s)
                    .ok_or_else(|| DeError::custom(format!("unknown severity '{s}'")))
            }
            other => Err(DeError::custom(format!(
                "severity must be a name or integer, got {other:?}"
            ))),
        }
    }
}
