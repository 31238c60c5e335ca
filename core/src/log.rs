//! Plugin log record model.
//!
//! External plugins write newline-delimited JSON records to stderr with
//! required `level` and `msg` fields plus arbitrary extra fields. The
//! supervisor parses these and re-emits them through the host's `tracing`
//! subscriber at the matching level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Log level announced by a plugin log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: '{}' (supported: DEBUG, INFO, WARN, ERROR)",
                s
            )),
        }
    }
}

/// A single structured log record from a plugin's stderr stream.
///
/// Extra fields beyond `level` and `msg` are collected into a sorted map so
/// re-emission is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginLogRecord {
    pub level: LogLevel,
    pub msg: String,
    /// Record timestamp, when the plugin emits one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<chrono::DateTime<chrono::Utc>>,
    /// All remaining fields, in sorted key order.
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl PluginLogRecord {
    /// A record stamped with the current time, for plugins emitting their
    /// own stderr stream.
    pub fn now(level: LogLevel, msg: impl Into<String>) -> Self {
        Self {
            level,
            msg: msg.into(),
            time: Some(chrono::Utc::now()),
            fields: BTreeMap::new(),
        }
    }

    /// Render the extra fields as `key=value` pairs in sorted key order.
    pub fn fields_display(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
