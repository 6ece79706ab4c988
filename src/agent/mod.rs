//! Backup driver: runs the refresh engine over every configured root and
//! applies each action as it is produced.
//!
//! Roots are processed one at a time in name order. A disconnected remote
//! ends the pass; the roots after it are reported as skipped.

#![allow(missing_docs)]

#[cfg(feature = "daemon")]
pub mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::apply::{Action, ActionKind};
use crate::core::config::Config;
use crate::core::errors::{MirrorError, Result};
use crate::index::root::Root;
use crate::index::verify::TreeStats;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::remote::{Remote, Status};
use crate::scanner::ignore::IgnorePredicate;
use crate::scanner::refresh::{Refresh, RefreshOptions, Step};

// ──────────────────── reports ────────────────────

/// Successful actions by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub add_dir: u64,
    pub add_file: u64,
    pub modify_file: u64,
    pub delete_dir: u64,
    pub delete_file: u64,
}

impl ActionCounts {
    fn record(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::AddDir => self.add_dir += 1,
            ActionKind::AddFile => self.add_file += 1,
            ActionKind::ModifyFile => self.modify_file += 1,
            ActionKind::DeleteDir => self.delete_dir += 1,
            ActionKind::DeleteFile => self.delete_file += 1,
            ActionKind::None => {}
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.add_dir + self.add_file + self.modify_file + self.delete_dir + self.delete_file
    }
}

/// How one root's scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RootOutcome {
    Completed,
    Disconnected,
    Interrupted,
    Failed { code: String, message: String },
    /// Not attempted because an earlier root ended the pass.
    Skipped,
}

impl RootOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Interrupted => "interrupted",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether the pass may continue with the next root.
    #[must_use]
    pub const fn continues_pass(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    fn from_error(err: &MirrorError) -> Self {
        Self::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootReport {
    pub name: String,
    pub actions: ActionCounts,
    /// Actions the remote or the apply layer rejected.
    pub failed: u64,
    pub outcome: RootOutcome,
    pub duration_ms: u64,
    /// Index shape after the scan; absent when the root never loaded.
    pub stats: Option<TreeStats>,
}

impl RootReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            actions: ActionCounts::default(),
            failed: 0,
            outcome: RootOutcome::Skipped,
            duration_ms: 0,
            stats: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub roots: Vec<RootReport>,
}

impl PassReport {
    /// Every root completed without rejected actions.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.roots
            .iter()
            .all(|r| r.outcome == RootOutcome::Completed && r.failed == 0)
    }

    #[must_use]
    pub fn total_actions(&self) -> u64 {
        self.roots.iter().map(|r| r.actions.total()).sum()
    }

    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.roots.iter().map(|r| r.failed).sum()
    }

    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.roots
            .iter()
            .any(|r| r.outcome == RootOutcome::Interrupted)
    }
}

// ──────────────────── agent ────────────────────

/// Drives backup passes for every configured root against one remote.
pub struct BackupAgent<R: Remote, I: IgnorePredicate> {
    config: Config,
    remote: R,
    ignore: I,
    logger: Option<ActivityLoggerHandle>,
    stop: Arc<AtomicBool>,
    only_root: Option<String>,
    record_dir: Option<PathBuf>,
}

impl<R: Remote, I: IgnorePredicate> BackupAgent<R, I> {
    pub fn new(config: Config, remote: R, ignore: I, logger: Option<ActivityLoggerHandle>) -> Self {
        Self {
            config,
            remote,
            ignore,
            logger,
            stop: Arc::new(AtomicBool::new(false)),
            only_root: None,
            record_dir: None,
        }
    }

    /// Stop between steps once `flag` is set.
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = flag;
        self
    }

    /// Keep record directories under `dir` instead of the configured one.
    #[must_use]
    pub fn with_record_dir(mut self, dir: PathBuf) -> Self {
        self.record_dir = Some(dir);
        self
    }

    /// Restrict passes to the root called `name`.
    #[must_use]
    pub fn with_root_filter(mut self, name: Option<String>) -> Self {
        self.only_root = name;
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Swap in a reloaded configuration; takes effect with the next root.
    ///
    /// The remote and ignore predicate are kept.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Record directory of the root called `name`.
    #[must_use]
    pub fn record_dir_for(&self, name: &str) -> PathBuf {
        self.record_dir
            .as_ref()
            .map_or_else(|| self.config.paths.root_record_dir(name), |dir| dir.join(name))
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Names and local paths of the roots a pass visits, in name order.
    fn selected_roots(&self) -> Vec<(String, PathBuf)> {
        self.config
            .backups
            .iter()
            .filter(|(name, _)| self.only_root.as_ref().is_none_or(|only| only == *name))
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect()
    }

    /// Run one pass over the selected roots.
    pub fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        let mut halted = false;
        for (name, local) in self.selected_roots() {
            if halted {
                report.roots.push(RootReport::new(&name));
                continue;
            }
            let root_report = self.run_root(&name, &local);
            halted = !root_report.outcome.continues_pass();
            report.roots.push(root_report);
        }
        report
    }

    fn run_root(&mut self, name: &str, local: &Path) -> RootReport {
        let started = Instant::now();
        let mut report = RootReport::new(name);

        match self.scan_root(name, local, &mut report) {
            Ok(outcome) => report.outcome = outcome,
            Err(err) => {
                eprintln!("[TMR-REFRESH] root {name}: {err}");
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                report.outcome = RootOutcome::from_error(&err);
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.emit(ActivityEvent::ScanCompleted {
            root: name.to_string(),
            actions: report.actions.total(),
            failed: report.failed,
            duration_ms: report.duration_ms,
            outcome: report.outcome.as_str().to_string(),
        });
        report
    }

    fn scan_root(&mut self, name: &str, local: &Path, report: &mut RootReport) -> Result<RootOutcome> {
        let record_dir = self.record_dir_for(name);
        let mut root = Root::load(name, local, &record_dir)?;
        if let Some(logger) = &self.logger {
            root = root.with_logger(logger.clone());
        }

        let options = RefreshOptions::from(&self.config.refresh);
        let mut refresh = Refresh::new(options, self.logger.clone());
        let mut prior = Status::Ok;
        let outcome = loop {
            if self.stop_requested() {
                break RootOutcome::Interrupted;
            }
            let action = match refresh.step(&root, &self.ignore, prior)? {
                Step::Finished => break RootOutcome::Completed,
                Step::Pending(action) => action,
            };
            let status = root.perform(&action, &mut self.remote)?;
            match next_prior(&action, status) {
                Ok(()) => {
                    report.actions.record(action.kind);
                    prior = Status::Ok;
                }
                Err(Some(retry)) => {
                    report.failed += 1;
                    prior = retry;
                }
                Err(None) if status == Status::Disconnected => break RootOutcome::Disconnected,
                Err(None) => {
                    report.failed += 1;
                    prior = Status::Ok;
                }
            }
        };

        root.sync()?;
        report.stats = Some(root.verify()?);
        Ok(outcome)
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

/// Decide what an applied action feeds into the next refresh step.
///
/// `Ok(())` is success. `Err(Some(status))` hands a recoverable status back
/// to the engine; `Err(None)` means the action failed and the scan moves on.
fn next_prior(action: &Action, status: Status) -> std::result::Result<(), Option<Status>> {
    match status {
        Status::Ok => Ok(()),
        Status::NotFound
            if matches!(action.kind, ActionKind::AddFile | ActionKind::ModifyFile) =>
        {
            Err(Some(Status::NotFound))
        }
        _ => Err(None),
    }
}
