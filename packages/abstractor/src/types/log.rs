//! Append-only processing log.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Step name used for lifecycle entries that belong to no pipeline stage.
pub const PIPELINE_LOG_STEP: &str = "pipeline";

/// Step name used for progress feed and polling entries.
pub const CONNECTION_LOG_STEP: &str = "connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log line. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: String,
    /// Local time the entry was appended, not the server's timestamp.
    pub timestamp: DateTime<Utc>,
    /// Wire id of the originating step, or one of the system step names.
    pub step: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    /// Plain-text rendering used by [`export_logs`].
    pub fn render(&self) -> String {
        let mut out = format!(
            "[{}] {} - {}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.step.to_uppercase(),
            self.level.as_str().to_uppercase(),
            self.message
        );
        if let Some(details) = &self.details {
            out.push_str("\nDetails: ");
            out.push_str(details);
        }
        if let Some(duration) = self.duration_ms {
            out.push_str(&format!("\nDuration: {}ms", duration));
        }
        out
    }
}

/// Render a log list as text, entries separated by a blank line.
pub fn export_logs(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(LogEntry::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Conventional file name for an exported log taken on `date`.
pub fn log_export_filename(date: NaiveDate) -> String {
    format!("jama-abstractor-logs-{}.txt", date.format("%Y-%m-%d"))
}
