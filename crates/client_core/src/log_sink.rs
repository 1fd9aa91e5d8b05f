use std::{
    fmt,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

pub trait LogSink: Send + Sync {
    fn record(&self, line: LogLine);

    fn debug(&self, message: &str) {
        self.record(LogLine::new(LogLevel::Debug, message));
    }

    fn info(&self, message: &str) {
        self.record(LogLine::new(LogLevel::Info, message));
    }

    fn warn(&self, message: &str) {
        self.record(LogLine::new(LogLevel::Warn, message));
    }

    fn error(&self, message: &str) {
        self.record(LogLine::new(LogLevel::Error, message));
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn record(&self, line: LogLine) {
        (**self).record(line);
    }
}

/// Forwards every line to `tracing` under the `realtime` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, line: LogLine) {
        match line.level {
            LogLevel::Debug => tracing::debug!(target: "realtime", "{}", line.message),
            LogLevel::Info => tracing::info!(target: "realtime", "{}", line.message),
            LogLevel::Warn => tracing::warn!(target: "realtime", "{}", line.message),
            LogLevel::Error => tracing::error!(target: "realtime", "{}", line.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLogSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.message.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, line: LogLine) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }
}
