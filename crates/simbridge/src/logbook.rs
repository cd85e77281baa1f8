//! Controller log store.
//!
//! One entry per line: `<RFC3339 timestamp> <LEVEL> <message>`. The
//! publisher appends, the reader returns most-recent-first slices.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::Mailbox;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Informational
    Info,
    /// Something was dropped or ignored
    Warn,
    /// An operation failed
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

/// A parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was written, if the line carried a parsable timestamp
    pub timestamp: Option<DateTime<Utc>>,
    /// Severity, if the line carried one
    pub level: Option<LogLevel>,
    /// Message text (the whole line for unstructured lines)
    pub message: String,
}

impl LogEntry {
    /// Parse a line, keeping unstructured lines as plain messages.
    pub fn parse(line: &str) -> Self {
        let structured = line.split_once(' ').and_then(|(ts, rest)| {
            let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
            let (level, message) = rest.split_once(' ').unwrap_or((rest, ""));
            let level = level.parse().ok()?;
            Some(Self {
                timestamp: Some(timestamp),
                level: Some(level),
                message: message.to_string(),
            })
        });
        structured.unwrap_or_else(|| Self {
            timestamp: None,
            level: None,
            message: line.to_string(),
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.timestamp, self.level) {
            (Some(ts), Some(level)) => write!(
                f,
                "{} {} {}",
                ts.to_rfc3339_opts(SecondsFormat::Millis, true),
                level,
                self.message
            ),
            _ => f.write_str(&self.message),
        }
    }
}

/// Append an entry to the controller log.
///
/// Failures never propagate: they go to `tracing` instead, so a full disk
/// or a missing directory cannot stop the simulation step.
pub fn append(mailbox: &Mailbox, level: LogLevel, message: &str) {
    match level {
        LogLevel::Info => tracing::info!(target: "simbridge::controller", "{message}"),
        LogLevel::Warn => tracing::warn!(target: "simbridge::controller", "{message}"),
        LogLevel::Error => tracing::error!(target: "simbridge::controller", "{message}"),
    }

    let entry = LogEntry {
        timestamp: Some(Utc::now()),
        level: Some(level),
        // Keep one entry per line.
        message: message.replace(['\r', '\n'], " "),
    };
    let path = mailbox.log_path();
    let open = || OpenOptions::new().create(true).append(true).open(&path);
    let result = match open() {
        Err(e) if e.kind() == io::ErrorKind::NotFound => path
            .parent()
            .map_or(Err(e), fs::create_dir_all)
            .and_then(|()| open()),
        other => other,
    }
    .and_then(|mut file| writeln!(file, "{entry}"));
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to append controller log");
    }
}

/// Up to `limit` most recent entries, newest first, optionally filtered by a
/// case-insensitive substring of the raw line.
pub fn read_recent(mailbox: &Mailbox, limit: usize, filter: Option<&str>) -> Vec<LogEntry> {
    let Ok(contents) = fs::read_to_string(mailbox.log_path()) else {
        return Vec::new();
    };
    let needle = filter.map(str::to_lowercase).filter(|f| !f.is_empty());

    contents
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| match &needle {
            Some(needle) => line.to_lowercase().contains(needle),
            None => true,
        })
        .take(limit)
        .map(LogEntry::parse)
        .collect()
}
