//! Reading types shared by every source backend.
//!
//! A [`Reading`] is one complete poll of one source. Partial readings are not a
//! supported shape: [`Reading::validate`] rejects a reading that is missing any
//! field of its group.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// GPS fields, in log column order.
pub const GPS_FIELDS: [&str; 7] = ["time", "lat", "lon", "alt", "speed", "climb", "track"];

/// Environmental / orientation fields, in log column order.
pub const ENVIRONMENT_FIELDS: [&str; 9] = [
    "pressure", "humidity", "temp", "pitch", "roll", "yaw", "acc_x", "acc_y", "acc_z",
];

/// Host system-health fields, in log column order.
pub const SYSTEM_FIELDS: [&str; 2] = ["voltage", "cpu_temp"];

/// The three independently paced data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Gps,
    Environment,
    System,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Gps, SourceKind::Environment, SourceKind::System];

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Gps => "gps",
            SourceKind::Environment => "environment",
            SourceKind::System => "system",
        }
    }

    /// Field names this source must produce on every successful poll.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Gps => &GPS_FIELDS,
            SourceKind::Environment => &ENVIRONMENT_FIELDS,
            SourceKind::System => &SYSTEM_FIELDS,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            SourceKind::Gps => 0,
            SourceKind::Environment => 1,
            SourceKind::System => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single named value inside a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Convert a JSON value, treating null and the literal `n/a` as absent.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("n/a") => None,
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One complete set of field values from a single poll of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    kind: SourceKind,
    values: BTreeMap<&'static str, FieldValue>,
}

impl Reading {
    /// Create an empty reading for the given source.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style [`Reading::insert`]. Unknown field names are dropped.
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Set a field. Returns `false` if the field does not belong to this source.
    pub fn insert(&mut self, field: &str, value: impl Into<FieldValue>) -> bool {
        match self.kind.fields().iter().find(|name| **name == field) {
            Some(name) => {
                self.values.insert(*name, value.into());
                true
            }
            None => false,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build a reading from a JSON object, picking this source's fields.
    pub fn from_json_object(
        kind: SourceKind,
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut reading = Reading::new(kind);
        for field in kind.fields() {
            if let Some(value) = object.get(*field).and_then(FieldValue::from_json) {
                reading.insert(field, value);
            }
        }
        reading
    }

    /// Check that every field of the group is present and plausible.
    pub fn validate(&self) -> Result<(), SourceError> {
        for &field in self.kind.fields() {
            if !self.values.contains_key(field) {
                return Err(SourceError::Incomplete {
                    kind: self.kind,
                    field,
                });
            }
        }

        // The pressure sensor reports 0 until it has warmed up.
        if self.kind == SourceKind::Environment {
            if let Some(pressure) = self.get("pressure").and_then(FieldValue::as_f64) {
                if pressure <= 0.0 {
                    return Err(SourceError::Malformed(format!(
                        "non-positive pressure {pressure}"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Reasons a poll did not produce a fresh reading.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("poll timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("{kind} reading is missing field '{field}'")]
    Incomplete {
        kind: SourceKind,
        field: &'static str,
    },

    #[error("adapter produced a {actual} reading for the {expected} source")]
    WrongSource {
        expected: SourceKind,
        actual: SourceKind,
    },

    #[error("poll worker has stopped")]
    WorkerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_environment(pressure: f64) -> Reading {
        ENVIRONMENT_FIELDS
            .iter()
            .fold(Reading::new(SourceKind::Environment), |r, f| r.with(f, 1.0))
            .with("pressure", pressure)
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let mut reading = Reading::new(SourceKind::System);
        assert!(reading.insert("voltage", 0.85));
        assert!(!reading.insert("lat", 51.0));
        assert_eq!(reading.len(), 1);
        assert!(reading.get("lat").is_none());
    }

    #[test]
    fn test_partial_reading_is_rejected() {
        let reading = Reading::new(SourceKind::System).with("voltage", 0.85);
        match reading.validate() {
            Err(SourceError::Incomplete { field, .. }) => assert_eq!(field, "cpu_temp"),
            other => panic!("expected incomplete reading, got {other:?}"),
        }

        let reading = reading.with("cpu_temp", 47.2);
        assert!(reading.validate().is_ok());
    }

    #[test]
    fn test_zero_pressure_is_malformed() {
        assert!(matches!(
            full_environment(0.0).validate(),
            Err(SourceError::Malformed(_))
        ));
        assert!(full_environment(1013.25).validate().is_ok());
    }

    #[test]
    fn test_json_conversion_skips_placeholders() {
        let object = serde_json::json!({
            "time": "2024-05-01T10:00:00.000Z",
            "lat": 51.5,
            "lon": "n/a",
            "alt": null,
            "unrelated": 3
        });
        let reading = Reading::from_json_object(SourceKind::Gps, object.as_object().unwrap());
        assert_eq!(reading.len(), 2);
        assert_eq!(reading.get("lat"), Some(&FieldValue::Number(51.5)));
        assert!(reading.get("lon").is_none());
    }

    #[test]
    fn test_field_lists_cover_eighteen_columns() {
        let total: usize = SourceKind::ALL.iter().map(|k| k.fields().len()).sum();
        assert_eq!(total, 18);
    }
}
