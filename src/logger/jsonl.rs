//! JSONL activity log: one self-contained JSON object per line.
//!
//! Each line is built in memory and handed to a single `write_all`, so a
//! reader tailing the file never sees half an entry.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MirrorError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event types written to the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStart,
    AgentStop,
    RootLoaded,
    DirAdd,
    FileAdd,
    FileModify,
    FilePending,
    DirDelete,
    FileDelete,
    RemoteFailure,
    ScanComplete,
    Warning,
    Error,
}

/// A single JSONL log entry; everything except `ts`, `event` and `severity`
/// is omitted when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Backup root name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Root-relative path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Actions applied during a scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<u64>,
    /// Actions that did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            path: None,
            size: None,
            actions: None,
            failed: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where the activity log goes and when it rolls over.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub path: PathBuf,
    /// Tried once when `path` cannot be opened or stops accepting writes.
    pub fallback_path: Option<PathBuf>,
    /// Roll the file over before it grows past this many bytes.
    pub rotate_at_bytes: u64,
    /// Rolled-over generations kept as `<path>.1` .. `<path>.N`.
    pub keep_rotated: u32,
}

impl LogFileConfig {
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            fallback_path: Some(std::env::temp_dir().join("treemirror-activity.jsonl")),
            rotate_at_bytes: 16 * 1024 * 1024,
            keep_rotated: 3,
        }
    }
}

enum Sink {
    File {
        out: BufWriter<File>,
        path: PathBuf,
        len: u64,
    },
    Stderr,
}

/// Append-only activity log. Degrades from the configured file to the
/// fallback file to stderr; a backup pass never fails because logging did.
pub struct JsonlWriter {
    config: LogFileConfig,
    sink: Sink,
}

impl JsonlWriter {
    pub fn open(config: LogFileConfig) -> Self {
        let sink = match open_log(&config.path) {
            Ok(sink) => sink,
            Err(err) => {
                eprintln!("[TMR-JSONL] {err}");
                Self::fallback_sink(&config)
            }
        };
        Self { config, sink }
    }

    /// File currently receiving entries; `None` once degraded to stderr.
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File { path, .. } => Some(path),
            Sink::Stderr => None,
        }
    }

    /// Append one entry as a single line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("[TMR-JSONL] cannot encode {:?} entry: {e}", entry.event);
                return;
            }
        };
        line.push('\n');

        if let Sink::File { len, .. } = &self.sink
            && *len > 0
            && *len + line.len() as u64 > self.config.rotate_at_bytes
        {
            self.roll_over();
        }

        // Primary, fallback, stderr: at most two step-downs.
        for _ in 0..3 {
            if self.append(&line) {
                return;
            }
            self.step_down();
        }
    }

    /// False when the current file rejected the write.
    fn append(&mut self, line: &str) -> bool {
        match &mut self.sink {
            Sink::File { out, len, .. } => {
                if out.write_all(line.as_bytes()).is_err() {
                    return false;
                }
                *len += line.len() as u64;
                true
            }
            Sink::Stderr => {
                let _ = io::stderr().write_all(line.as_bytes());
                true
            }
        }
    }

    /// Flush and fsync; called when the logger thread exits.
    pub fn finish(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
    }

    fn fallback_sink(config: &LogFileConfig) -> Sink {
        if let Some(fallback) = &config.fallback_path {
            match open_log(fallback) {
                Ok(sink) => {
                    eprintln!("[TMR-JSONL] logging to {}", fallback.display());
                    return sink;
                }
                Err(err) => eprintln!("[TMR-JSONL] {err}"),
            }
        }
        eprintln!("[TMR-JSONL] activity log goes to stderr");
        Sink::Stderr
    }

    /// Leave a file that stopped accepting writes.
    fn step_down(&mut self) {
        let on_primary = matches!(&self.sink, Sink::File { path, .. } if *path == self.config.path);
        self.sink = if on_primary {
            Self::fallback_sink(&self.config)
        } else {
            eprintln!("[TMR-JSONL] activity log goes to stderr");
            Sink::Stderr
        };
    }

    /// Shift `<path>.N-1` to `<path>.N` down to `<path>` itself, then reopen.
    fn roll_over(&mut self) {
        let Sink::File { out, path, .. } = &mut self.sink else {
            return;
        };
        let _ = out.flush();
        let path = path.clone();

        let keep = self.config.keep_rotated;
        if keep == 0 {
            let _ = fs::remove_file(&path);
        } else {
            let _ = fs::remove_file(generation(&path, keep));
            for n in (1..keep).rev() {
                let _ = fs::rename(generation(&path, n), generation(&path, n + 1));
            }
            let _ = fs::rename(&path, generation(&path, 1));
        }

        match open_log(&path) {
            Ok(sink) => self.sink = sink,
            Err(err) => {
                eprintln!("[TMR-JSONL] {err}");
                self.step_down();
            }
        }
    }
}

fn open_log(path: &Path) -> Result<Sink> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MirrorError::io(path, e))?;
    let len = file.metadata().map_or(0, |m| m.len());
    Ok(Sink::File {
        out: BufWriter::new(file),
        path: path.to_path_buf(),
        len,
    })
}

/// `activity.jsonl` generation 2 is `activity.jsonl.2`.
fn generation(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Format current UTC time as ISO 8601.
fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf, rotate_at_bytes: u64) -> LogFileConfig {
        LogFileConfig {
            path,
            fallback_path: None,
            rotate_at_bytes,
            keep_rotated: 2,
        }
    }

    #[test]
    fn entries_are_separate_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));

        let mut entry = LogEntry::new(EventType::FileAdd, Severity::Info);
        entry.root = Some("docs".to_string());
        entry.path = Some("a.txt".to_string());
        entry.size = Some(12);
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::ScanComplete, Severity::Info));
        writer.finish();

        let contents = fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(parsed["event"], "file_add");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["root"], "docs");
        assert_eq!(parsed["size"], 12);
        assert!(parsed["ts"].as_str().expect("ts").ends_with('Z'));
    }

    #[test]
    fn unset_fields_are_omitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::new(EventType::AgentStart, Severity::Info));
        writer.finish();

        let line = fs::read_to_string(&path).expect("read log");
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"root\""));
        assert!(!line.contains("\"failed\""));
    }

    #[test]
    fn roll_over_keeps_bounded_generations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 100));
        for _ in 0..12 {
            writer.write_entry(&LogEntry::new(EventType::DirAdd, Severity::Info));
        }
        writer.finish();

        assert!(path.exists());
        assert!(generation(&path, 1).exists());
        assert!(generation(&path, 2).exists());
        assert!(!generation(&path, 3).exists());
        for file in [path.clone(), generation(&path, 1)] {
            let body = fs::read_to_string(&file).expect("read generation");
            assert!(body.len() <= 100, "{} holds {} bytes", file.display(), body.len());
            assert!(body.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
        }
    }

    #[test]
    fn unopenable_path_uses_the_fallback_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").expect("write blocker");
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(LogFileConfig {
            fallback_path: Some(fallback.clone()),
            ..config(blocker.join("primary.jsonl"), 1024 * 1024)
        });

        assert_eq!(writer.destination(), Some(fallback.as_path()));
        writer.write_entry(&LogEntry::new(EventType::Warning, Severity::Warning));
        writer.finish();
        assert!(!fs::read_to_string(&fallback).expect("read").is_empty());
    }

    #[test]
    fn no_usable_file_degrades_to_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").expect("write blocker");
        let mut writer = JsonlWriter::open(config(blocker.join("primary.jsonl"), 1024));
        assert_eq!(writer.destination(), None);
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Critical));
        writer.finish();
    }
}
