//! Log frames produced by a container or an exec context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stream a frame originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    StdOut,
    StdErr,
    StdIn,
    /// TTY output, where stdout and stderr are not separated
    Console,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::StdOut => write!(f, "stdout"),
            LogSource::StdErr => write!(f, "stderr"),
            LogSource::StdIn => write!(f, "stdin"),
            LogSource::Console => write!(f, "console"),
        }
    }
}

/// A chunk of output tagged with its origin stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Runtime timestamp, when the runtime supplied one
    pub timestamp: Option<DateTime<Utc>>,
    pub source: LogSource,
    /// Raw bytes, forwarded verbatim
    pub message: Vec<u8>,
}

impl LogLine {
    pub fn new(source: LogSource, message: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: None,
            source,
            message: message.into(),
        }
    }

    pub fn stdout(message: impl Into<Vec<u8>>) -> Self {
        Self::new(LogSource::StdOut, message)
    }

    pub fn stderr(message: impl Into<Vec<u8>>) -> Self {
        Self::new(LogSource::StdErr, message)
    }

    /// Build a frame from runtime output that may carry an RFC 3339 timestamp
    /// prefix (`2024-05-01T10:00:00.000000000Z message`).
    ///
    /// The prefix is stripped only when it parses; anything else is kept as-is.
    pub fn from_timestamped(source: LogSource, raw: &[u8]) -> Self {
        if let Some(space) = raw.iter().position(|b| *b == b' ') {
            if let Ok(prefix) = std::str::from_utf8(&raw[..space]) {
                if let Ok(ts) = DateTime::parse_from_rfc3339(prefix) {
                    return Self {
                        timestamp: Some(ts.with_timezone(&Utc)),
                        source,
                        message: raw[space + 1..].to_vec(),
                    };
                }
            }
        }
        Self::new(source, raw)
    }

    /// Message as text, lossily decoded and without the trailing newline
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.message)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.timestamp {
            Some(ts) => write!(
                f,
                "{} {}: {}",
                ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                self.source,
                self.text()
            ),
            None => write!(f, "{}: {}", self.source, self.text()),
        }
    }
}

/// Which container streams to attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Keep the stream open and deliver new output as it is written
    pub follow: bool,
    /// Ask the runtime to prefix each frame with its timestamp
    pub timestamps: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            follow: true,
            timestamps: true,
        }
    }
}
