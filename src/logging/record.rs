use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::Level;

/// Free-form fields of a log record.
pub type Fields = Map<String, Value>;

/// Keys written by the record itself, a free-form field using one of them is
/// rendered under `fields.<key>`.
pub const RESERVED_KEYS: &[&str] = &["level", "timestamp", "logger", "message", "file", "line"];

/// A single structured log event.
///
/// Built once per log call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    timestamp: DateTime<Utc>,
    level: Level,
    logger: String,
    message: String,
    location: Option<(&'static str, u32)>,
    fields: Fields,
}

impl LogRecord {
    /// A record timestamped now.
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level,
            logger: logger.into(),
            message: message.into(),
            location: None,
            fields: Fields::new(),
        }
    }

    pub fn with_location(self, file: &'static str, line: u32) -> Self {
        LogRecord {
            location: Some((file, line)),
            ..self
        }
    }

    pub fn with_fields(self, fields: Fields) -> Self {
        LogRecord { fields, ..self }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn logger(&self) -> &str {
        &self.logger
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<(&'static str, u32)> {
        self.location
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// The record as one JSON object terminated by a newline.
    pub fn to_json_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("level", self.level.as_str())?;
        map.serialize_entry(
            "timestamp",
            &self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        )?;
        map.serialize_entry("logger", &self.logger)?;
        map.serialize_entry("message", &self.message)?;
        if let Some((file, line)) = self.location {
            map.serialize_entry("file", file)?;
            map.serialize_entry("line", &line)?;
        }
        for (key, value) in &self.fields {
            map.serialize_entry(&*self.output_key(key), value)?;
        }
        map.end()
    }
}

impl LogRecord {
    /// Key under which the free-form field `key` is written.
    ///
    /// A reserved key is prefixed with `fields.` as many times as needed to
    /// stay clear of the other fields of the record.
    fn output_key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        if !RESERVED_KEYS.contains(&key) {
            return Cow::Borrowed(key);
        }
        let mut renamed = format!("fields.{key}");
        while self.fields.contains_key(&renamed) {
            renamed.insert_str(0, "fields.");
        }
        Cow::Owned(renamed)
    }
}
