//! Plain handle-passed logger
//!
//! Console lines are `<level> <message>`; an optional file sink gets the
//! same lines appended. Clones share the sink, so every trial thread builds
//! its own logger.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
        }
    }
}

#[derive(Clone)]
pub struct Logger {
    level: LogLevel,
    sink: Option<Arc<Mutex<File>>>,
}

impl Logger {
    /// Console-only logger
    pub fn new(level: LogLevel) -> Self {
        Self { level, sink: None }
    }

    /// Logger that also appends to `path`
    pub fn with_file(level: LogLevel, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { level, sink: Some(Arc::new(Mutex::new(file))) })
    }

    fn log(&self, level: LogLevel, message: &str) {
        if level < self.level {
            return;
        }
        let line = format!("{level} {message}");
        println!("{line}");
        if let Some(sink) = &self.sink {
            if let Ok(mut file) = sink.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.log");
        let logger = Logger::with_file(LogLevel::Info, &path).unwrap();
        logger.info("first");
        logger.warn("second");
        logger.debug("filtered");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("INFO first"));
        assert!(contents.contains("WARN second"));
        assert!(!contents.contains("filtered"));
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
    }
}
