//! Operator-facing event log: a bounded ring buffer for the status API,
//! a broadcast channel for live observers, and a tail-append `app.log`.
//!
//! Logging must never slow a fetch down: the broadcast drops entries for
//! lagging receivers and file write errors degrade to tracing warnings.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

const RING_CAPACITY: usize = 500;
const BROADCAST_CAPACITY: usize = 256;
const LOG_FILE: &str = "app.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

pub struct EventLog {
    ring: Mutex<VecDeque<LogEntry>>,
    tx: broadcast::Sender<LogEntry>,
    file: Option<Mutex<File>>,
}

impl EventLog {
    /// Opens (or creates) `<logs_dir>/app.log` for appending. A log file
    /// that cannot be opened disables disk persistence but not the ring.
    pub fn new(logs_dir: &Path) -> Self {
        let file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_dir.join(LOG_FILE))
        {
            Ok(f) => Some(Mutex::new(f)),
            Err(e) => {
                warn!("Event log file unavailable ({}); ring buffer only", e);
                None
            }
        };

        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            tx,
            file,
        }
    }

    /// In-memory only; used by tests and ephemeral tooling.
    pub fn ephemeral() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            tx,
            file: None,
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    fn record(&self, level: LogLevel, message: String) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message,
        };

        if let Some(file) = &self.file {
            let line = format!(
                "[{}] [{}] {}\n",
                entry.timestamp,
                entry.level.as_str(),
                entry.message
            );
            if let Ok(mut f) = file.lock() {
                if let Err(e) = f.write_all(line.as_bytes()) {
                    warn!("Event log append failed: {}", e);
                }
            }
        }

        {
            let mut ring = self
                .ring
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }

        // Nobody listening is fine; lagging receivers drop entries.
        let _ = self.tx.send(entry);
    }

    pub fn recent(&self) -> Vec<LogEntry> {
        self.ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let log = EventLog::ephemeral();
        for i in 0..(RING_CAPACITY + 50) {
            log.info(format!("entry {i}"));
        }
        let entries = log.recent();
        assert_eq!(entries.len(), RING_CAPACITY);
        assert_eq!(entries[0].message, "entry 50");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let log = EventLog::ephemeral();
        let mut rx = log.subscribe();
        log.warn("pool slot 2 reconnecting");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
        assert!(entry.message.contains("slot 2"));
    }

    #[test]
    fn file_lines_follow_log_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        log.error("upstream refused");
        drop(log);

        let raw = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        let line = raw.lines().next().unwrap();
        assert!(line.starts_with('['));
        assert!(line.contains("] [error] upstream refused"));
    }
}
