//! Diagnostic logging context.
//!
//! Compilation stages report warnings and informational notes through a
//! [`Logger`] handed to them by the caller. The logger carries a severity
//! threshold and a replaceable [`LogSink`]; nothing here is global, so two
//! compilations can use different settings side by side.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Message severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
        })
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Receives every message that passes the logger's threshold.
pub trait LogSink {
    fn log(&self, level: LogLevel, message: &str);
}

/// Writes messages to standard error, one per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, _level: LogLevel, message: &str) {
        eprintln!("{message}");
    }
}

/// Forwards messages to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(target: "cil", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "cil", "{message}"),
            LogLevel::Info => tracing::info!(target: "cil", "{message}"),
        }
    }
}

/// Collects messages in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Rc<RefCell<Vec<(LogLevel, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages.borrow().clone()
    }

    /// True when some message at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.messages
            .borrow()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        self.messages.borrow_mut().push((level, message.to_string()));
    }
}

/// Severity threshold plus sink.
pub struct Logger {
    level: LogLevel,
    sink: Box<dyn LogSink>,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            level: LogLevel::Error,
            sink: Box::new(StderrSink),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish_non_exhaustive()
    }
}

impl Logger {
    pub fn new(level: LogLevel, sink: impl LogSink + 'static) -> Self {
        Self {
            level,
            sink: Box::new(sink),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub fn set_sink(&mut self, sink: impl LogSink + 'static) {
        self.sink = Box::new(sink);
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        if self.enabled(level) {
            self.sink.log(level, message.as_ref());
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_filters_messages() {
        let sink = MemorySink::new();
        let mut logger = Logger::new(LogLevel::Warn, sink.clone());
        logger.error("bad");
        logger.warn("careful");
        logger.info("chatty");
        assert_eq!(sink.messages().len(), 2);
        assert!(!sink.contains(LogLevel::Info, "chatty"));

        logger.set_level(LogLevel::Info);
        logger.info("chatty");
        assert!(sink.contains(LogLevel::Info, "chatty"));
    }

    #[test]
    fn sink_can_be_replaced_between_runs() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let mut logger = Logger::new(LogLevel::Error, first.clone());
        logger.error("one");
        logger.set_sink(second.clone());
        logger.error("two");
        assert_eq!(first.messages(), vec![(LogLevel::Error, "one".to_string())]);
        assert_eq!(second.messages(), vec![(LogLevel::Error, "two".to_string())]);
    }

    #[test]
    fn levels_parse_from_strings() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
