//! Log event record and its wire format.

use std::panic::Location;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::tag::{Tag, TagRecord};

/// Format a timestamp the way events carry it: RFC 3339, whole seconds, `Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// File and line an event was emitted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Last path component of the file, used as the message prefix.
    pub fn file_name(&self) -> &str {
        self.file
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(self.file.as_str())
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_name(), self.line)
    }
}

/// A single captured log record. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    message: String,
    timestamp: DateTime<Utc>,
    tag: Option<Tag>,
    location: Option<SourceLocation>,
}

impl LogEvent {
    /// Create an event stamped with the current UTC time.
    pub fn new(
        message: impl Into<String>,
        tag: Option<Tag>,
        location: Option<SourceLocation>,
    ) -> Self {
        Self::at(message, Utc::now(), tag, location)
    }

    /// Create an event with an explicit timestamp.
    pub fn at(
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        tag: Option<Tag>,
        location: Option<SourceLocation>,
    ) -> Self {
        Self {
            message: message.into(),
            timestamp,
            tag,
            location,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp in wire/file format.
    pub fn time(&self) -> String {
        format_timestamp(self.timestamp)
    }

    pub fn tag(&self) -> Option<Tag> {
        self.tag
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }
}

/// Borrowed view matching the collector schema:
/// `{"log", "time", "tag", "file_name", "file_line"}`.
#[derive(Serialize)]
struct WireEvent<'a> {
    log: &'a str,
    time: String,
    tag: TagRecord,
    file_name: &'a str,
    file_line: u32,
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEvent {
            log: &self.message,
            time: self.time(),
            tag: TagRecord::from(self.tag),
            file_name: self.location.as_ref().map(|l| l.file.as_str()).unwrap_or(""),
            file_line: self.location.as_ref().map(|l| l.line).unwrap_or(0),
        }
        .serialize(serializer)
    }
}
