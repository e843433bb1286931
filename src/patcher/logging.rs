//! Leveled logging capability passed to the scanner.
//!
//! Every component that reports progress takes a `&dyn LogSink` instead of reaching for a
//! global logger. [`LogFacade`] forwards to the `log` crate; [`RecordingSink`] keeps records in
//! memory so scans can be inspected.

use std::sync::Mutex;

use strum::{Display, EnumIter};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[allow(missing_docs)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Receives log records.
pub trait LogSink {
    /// Records `message` at `level`.
    fn log(&self, level: LogLevel, message: &str);

    /// Records a debug message.
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Records an informational message.
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Records a warning.
    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    /// Records an error.
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Records a fatal error.
    fn fatal(&self, message: &str) {
        self.log(LogLevel::Fatal, message);
    }
}

/// Forwards records to the `log` facade under the `repolib_patcher` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl LogSink for LogFacade {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => log::debug!(target: "repolib_patcher", "{message}"),
            LogLevel::Info => log::info!(target: "repolib_patcher", "{message}"),
            LogLevel::Warning => log::warn!(target: "repolib_patcher", "{message}"),
            LogLevel::Error => log::error!(target: "repolib_patcher", "{message}"),
            LogLevel::Fatal => log::error!(target: "repolib_patcher", "FATAL {message}"),
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every record so far.
    #[must_use]
    pub fn records(&self) -> Vec<(LogLevel, String)> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Messages logged at `level`.
    #[must_use]
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(record_level, _)| *record_level == level)
            .map(|(_, message)| message)
            .collect()
    }

    /// Number of records at `level`.
    #[must_use]
    pub fn count(&self, level: LogLevel) -> usize {
        self.messages(level).len()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: LogLevel, message: &str) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((level, message.to_string()));
    }
}
