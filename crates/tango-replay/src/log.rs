//! Append-only execution log.
//!
//! Entries are kept for the batch report, pushed to every registered
//! [`LogSink`] as they happen (streaming) and mirrored into `tracing`.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub level: LogLevel,
    /// Part of the run the entry belongs to, when it is not a step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub message: String,
}

impl LogEntry {
    /// One-line form used for streamed events and batch `logs`.
    pub fn render(&self) -> String {
        let label = match self.level {
            LogLevel::Info => return self.message.clone(),
            LogLevel::Debug => "DEBUG",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        match &self.scope {
            Some(scope) => format!("{label} {scope}: {}", self.message),
            None => format!("{label}: {}", self.message),
        }
    }
}

/// Receives every entry at the moment it is appended.
///
/// Sinks may read the log they are attached to (the entry is already stored
/// when they run) but must not append to it.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: &LogEntry);
}

/// Forwards entries over a channel. A dropped receiver is ignored.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<LogEntry>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, entry: &LogEntry) {
        let _ = self.tx.send(entry.clone());
    }
}

impl<F> LogSink for F
where
    F: Fn(&LogEntry) + Send + Sync,
{
    fn emit(&self, entry: &LogEntry) {
        self(entry)
    }
}

#[derive(Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<LogEntry>>,
    /// Serializes fan-out so sinks see entries in append order.
    dispatch: Mutex<()>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    fn entries(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, step_index: Option<usize>, level: LogLevel, message: impl Into<String>) {
        self.append(LogEntry {
            timestamp: Utc::now(),
            step_index,
            level,
            scope: None,
            message: message.into(),
        });
    }

    /// Run-level failure attributed to `scope`, rendered as `ERROR <scope>: ...`.
    pub fn scoped_error(&self, scope: &str, message: impl Into<String>) {
        self.append(LogEntry {
            timestamp: Utc::now(),
            step_index: None,
            level: LogLevel::Error,
            scope: Some(scope.to_string()),
            message: message.into(),
        });
    }

    fn append(&self, entry: LogEntry) {
        let step_index = entry.step_index;

        match entry.level {
            LogLevel::Debug => tracing::debug!(step = ?step_index, "{}", entry.message),
            LogLevel::Info => tracing::info!(step = ?step_index, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(step = ?step_index, "{}", entry.message),
            LogLevel::Error => tracing::error!(step = ?step_index, "{}", entry.message),
        }

        let _dispatch = self
            .dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.entries().push(entry.clone());
        for sink in &self.sinks {
            sink.emit(&entry);
        }
    }

    pub fn debug(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.push(step_index, LogLevel::Debug, message);
    }

    pub fn info(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.push(step_index, LogLevel::Info, message);
    }

    pub fn warn(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.push(step_index, LogLevel::Warn, message);
    }

    pub fn error(&self, step_index: Option<usize>, message: impl Into<String>) {
        self.push(step_index, LogLevel::Error, message);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries().clone()
    }

    /// Rendered messages, in emission order.
    pub fn messages(&self) -> Vec<String> {
        self.entries().iter().map(LogEntry::render).collect()
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::OnceCell;
    use std::sync::Weak;

    #[test]
    fn test_render_prefixes_by_level() {
        let log = ExecutionLog::new();
        log.info(None, "Page loaded");
        log.debug(Some(1), "waitAndClick resolved");
        log.warn(None, "No new page");
        log.error(Some(2), "Element not found -> Next");
        log.scoped_error("main", "Run cancelled");
        assert_eq!(
            log.messages(),
            vec![
                "Page loaded",
                "DEBUG: waitAndClick resolved",
                "WARN: No new page",
                "ERROR: Element not found -> Next",
                "ERROR main: Run cancelled",
            ]
        );
    }

    #[test]
    fn test_channel_sink_sees_entries_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        let log = ExecutionLog::new().with_sink(sink);
        log.info(Some(1), "first");
        log.info(Some(1), "second");
        assert_eq!(rx.try_recv().unwrap().message, "first");
        assert_eq!(rx.try_recv().unwrap().message, "second");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_closure_sink_and_dropped_receiver() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_sink = seen.clone();
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        let log = ExecutionLog::new()
            .with_sink(sink)
            .with_sink(move |entry: &LogEntry| {
                seen_in_sink.lock().unwrap().push(entry.render())
            });
        log.error(None, "boom");
        assert_eq!(*seen.lock().unwrap(), vec!["ERROR: boom".to_string()]);
    }

    #[test]
    fn test_sink_can_read_its_own_log() {
        let handle: Arc<OnceCell<Weak<ExecutionLog>>> = Arc::default();
        let reader = handle.clone();
        let lengths = Arc::new(Mutex::new(Vec::new()));
        let seen = lengths.clone();
        let log = Arc::new(ExecutionLog::new().with_sink(move |_: &LogEntry| {
            if let Some(log) = reader.get().and_then(Weak::upgrade) {
                seen.lock().unwrap().push(log.len());
            }
        }));
        handle.set(Arc::downgrade(&log)).unwrap();

        log.info(None, "Opening page...");
        log.info(None, "Page loaded");
        assert_eq!(*lengths.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_entry_serializes_lowercase_level() {
        let log = ExecutionLog::new();
        log.info(Some(3), "Typed: \"x\"");
        let json = serde_json::to_value(&log.into_entries()[0]).unwrap();
        assert_eq!(json["level"], "info");
        assert_eq!(json["step_index"], 3);
    }
}
