//! Activity logger: a dedicated thread owns the [`JsonlWriter`].
//!
//! Everything else sends [`ActivityEvent`]s through a bounded crossbeam
//! channel. `try_send` keeps a backup pass from ever blocking on logging.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{MirrorError, Result};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, LogFileConfig, Severity};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events recorded in the activity log.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    AgentStarted {
        version: String,
        config_hash: String,
        roots: usize,
    },
    AgentStopped {
        reason: String,
        passes: u64,
        duration_ms: u64,
    },
    RootLoaded {
        root: String,
        records: u32,
        dirs: u32,
        files: u32,
        free: u32,
    },
    DirAdded {
        root: String,
        path: String,
    },
    FileAdded {
        root: String,
        path: String,
        size_bytes: u64,
    },
    FileModified {
        root: String,
        path: String,
        size_bytes: u64,
    },
    /// Source could not be read; retried on a later pass.
    FilePending {
        root: String,
        path: String,
    },
    DirDeleted {
        root: String,
        path: String,
    },
    FileDeleted {
        root: String,
        path: String,
    },
    RemoteFailed {
        root: String,
        path: String,
        action: String,
        status: String,
    },
    ScanCompleted {
        root: String,
        actions: u64,
        failed: u64,
        duration_ms: u64,
        outcome: String,
    },
    Warning {
        root: Option<String>,
        path: Option<String>,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable, non-blocking sender.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event; dropped (and counted) when the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// A handle with no thread behind it, plus the receiving end.
    ///
    /// Used where events should be inspected rather than written.
    #[must_use]
    pub fn detached(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }
}

// ──────────────────── configuration ────────────────────

pub struct LoggerConfig {
    pub file: LogFileConfig,
    pub channel_capacity: usize,
}

impl LoggerConfig {
    /// Log to `path`, falling back to the temp directory.
    #[must_use]
    pub fn for_path(path: std::path::PathBuf) -> Self {
        Self {
            file: LogFileConfig::at(path),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread.
///
/// Runs until [`ActivityLoggerHandle::shutdown`] is called or every handle
/// is dropped.
pub fn spawn_logger(config: LoggerConfig) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("tmir-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.file, &dropped_clone))
        .map_err(|e| MirrorError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: LogFileConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Warning, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.finish();
}

// ──────────────────── event conversion ────────────────────

fn entry_for(event: EventType, severity: Severity, root: &str, path: &str) -> LogEntry {
    let mut e = LogEntry::new(event, severity);
    e.root = Some(root.to_string());
    e.path = Some(path.to_string());
    e
}

#[allow(clippy::too_many_lines)]
pub(crate) fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::AgentStarted {
            version,
            config_hash,
            roots,
        } => {
            let mut e = LogEntry::new(EventType::AgentStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} roots={roots}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::AgentStopped {
            reason,
            passes,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::AgentStop, Severity::Info);
            e.details = Some(format!("reason={reason} passes={passes}"));
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::RootLoaded {
            root,
            records,
            dirs,
            files,
            free,
        } => {
            let mut e = LogEntry::new(EventType::RootLoaded, Severity::Info);
            e.root = Some(root.clone());
            e.details = Some(format!(
                "records={records} dirs={dirs} files={files} free={free}"
            ));
            e
        }
        ActivityEvent::DirAdded { root, path } => {
            let mut e = entry_for(EventType::DirAdd, Severity::Info, root, path);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileAdded {
            root,
            path,
            size_bytes,
        } => {
            let mut e = entry_for(EventType::FileAdd, Severity::Info, root, path);
            e.size = Some(*size_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileModified {
            root,
            path,
            size_bytes,
        } => {
            let mut e = entry_for(EventType::FileModify, Severity::Info, root, path);
            e.size = Some(*size_bytes);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FilePending { root, path } => {
            let mut e = entry_for(EventType::FilePending, Severity::Warning, root, path);
            e.details = Some("source locked, retry deferred".to_string());
            e
        }
        ActivityEvent::DirDeleted { root, path } => {
            let mut e = entry_for(EventType::DirDelete, Severity::Info, root, path);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileDeleted { root, path } => {
            let mut e = entry_for(EventType::FileDelete, Severity::Info, root, path);
            e.ok = Some(true);
            e
        }
        ActivityEvent::RemoteFailed {
            root,
            path,
            action,
            status,
        } => {
            let mut e = entry_for(EventType::RemoteFailure, Severity::Warning, root, path);
            e.ok = Some(false);
            e.error_message = Some(status.clone());
            e.details = Some(format!("action={action}"));
            e
        }
        ActivityEvent::ScanCompleted {
            root,
            actions,
            failed,
            duration_ms,
            outcome,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.root = Some(root.clone());
            e.actions = Some(*actions);
            e.failed = Some(*failed);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(outcome == "completed");
            e.details = Some(format!("outcome={outcome}"));
            e
        }
        ActivityEvent::Warning {
            root,
            path,
            details,
        } => {
            let mut e = LogEntry::new(EventType::Warning, Severity::Warning);
            e.root.clone_from(root);
            e.path.clone_from(path);
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::AgentStop, Severity::Info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_the_log_file_before_shutdown_returns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("activity.jsonl");
        let (handle, join) = spawn_logger(LoggerConfig::for_path(path.clone())).expect("spawn");

        handle.send(ActivityEvent::FileAdded {
            root: "docs".to_string(),
            path: "a.txt".to_string(),
            size_bytes: 3,
        });
        handle.send(ActivityEvent::ScanCompleted {
            root: "docs".to_string(),
            actions: 1,
            failed: 0,
            duration_ms: 5,
            outcome: "completed".to_string(),
        });
        handle.shutdown();
        join.join().expect("logger thread");

        let contents = std::fs::read_to_string(&path).expect("read log");
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "file_add");
        assert_eq!(events[0]["path"], "a.txt");
        assert_eq!(events[1]["event"], "scan_complete");
        assert_eq!(events[1]["ok"], true);
    }

    #[test]
    fn full_channel_counts_drops() {
        let (handle, _rx) = ActivityLoggerHandle::detached(1);
        for _ in 0..3 {
            handle.send(ActivityEvent::DirAdded {
                root: "r".to_string(),
                path: "d".to_string(),
            });
        }
        assert_eq!(handle.dropped_events(), 2);
    }

    #[test]
    fn remote_failure_maps_status_to_error_message() {
        let entry = event_to_log_entry(&ActivityEvent::RemoteFailed {
            root: "docs".to_string(),
            path: "b.txt".to_string(),
            action: "add_file".to_string(),
            status: "conflict".to_string(),
        });
        assert_eq!(entry.event, EventType::RemoteFailure);
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.ok, Some(false));
        assert_eq!(entry.error_message.as_deref(), Some("conflict"));
    }

    #[test]
    fn failed_scan_is_not_ok() {
        let entry = event_to_log_entry(&ActivityEvent::ScanCompleted {
            root: "docs".to_string(),
            actions: 4,
            failed: 1,
            duration_ms: 10,
            outcome: "disconnected".to_string(),
        });
        assert_eq!(entry.ok, Some(false));
        assert_eq!(entry.failed, Some(1));
    }
}
