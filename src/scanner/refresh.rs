//! Resumable depth-first differ between the index and the local tree.
//!
//! [`Refresh::step`] returns at most one [`Action`] per call. The caller
//! applies it (or not) and passes the resulting [`Status`] into the next call.
//! The engine keeps a stack of frames, one per directory being compared, and
//! each frame moves through the stages
//!
//! ```text
//! INIT -> REMOVE -> NEW -> RECUR -> RETURN
//!                      \-> REDOUPPER (directory vanished; parent redoes INIT)
//! ```
//!
//! Frames hold [`NodeId`]s, and the whole stack is revalidated against the
//! index before every step, so the caller may mutate the index freely
//! between calls.

#![allow(missing_docs)]

use std::collections::HashMap;

use crate::apply::{Action, ActionKind};
use crate::core::config::RefreshConfig;
use crate::core::errors::{MirrorError, Result};
use crate::core::paths::{join_rel, local_path, name_cmp};
use crate::index::record::{NodeId, ROOT_INDEX, stored_size};
use crate::index::root::{Lookup, Root};
use crate::index::store::Entry;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::remote::Status;
use crate::scanner::ignore::IgnorePredicate;
use crate::scanner::listing::{FsItem, list_directory};

/// Tunables for one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Time differences up to this many seconds are not modifications.
    pub mtime_slack: u32,
    /// Failures tolerated per path before the scan aborts.
    pub max_failures: u32,
    /// Treat pending files as modified on every pass.
    pub retry_pending: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            mtime_slack: 10,
            max_failures: 2,
            retry_pending: true,
        }
    }
}

impl From<&RefreshConfig> for RefreshOptions {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            mtime_slack: config.mtime_slack_secs,
            max_failures: config.max_path_failures,
            retry_pending: config.retry_pending,
        }
    }
}

/// Result of one [`Refresh::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Pending(Action),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Remove,
    New,
    Recur,
    RedoUpper,
    Return,
}

/// Position in a directory's child chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Start,
    At(NodeId),
    End,
}

#[derive(Debug)]
struct Frame {
    node: NodeId,
    name: String,
    rel: String,
    stage: Stage,
    listing: Vec<FsItem>,
    cursor: Cursor,
    entry_cursor: usize,
}

impl Frame {
    fn new(node: NodeId, name: String, rel: String) -> Self {
        Self {
            node,
            name,
            rel,
            stage: Stage::Init,
            listing: Vec::new(),
            cursor: Cursor::Start,
            entry_cursor: 0,
        }
    }

    fn restart(&mut self) {
        self.stage = Stage::Init;
        self.listing.clear();
        self.cursor = Cursor::Start;
        self.entry_cursor = 0;
    }
}

/// The differ for one backup root.
pub struct Refresh {
    options: RefreshOptions,
    frames: Vec<Frame>,
    started: bool,
    failures: HashMap<String, u32>,
    last_action: Option<Action>,
    root_name: Option<String>,
    logger: Option<ActivityLoggerHandle>,
}

impl Refresh {
    #[must_use]
    pub fn new(options: RefreshOptions, logger: Option<ActivityLoggerHandle>) -> Self {
        Self {
            options,
            frames: Vec::new(),
            started: false,
            failures: HashMap::new(),
            last_action: None,
            root_name: None,
            logger,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.started && self.frames.is_empty()
    }

    /// Current stack depth; 0 before the first step and after the last.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Stage of the innermost frame.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        self.frames.last().map(|f| f.stage)
    }

    #[must_use]
    pub fn last_action(&self) -> Option<&Action> {
        self.last_action.as_ref()
    }

    /// Failures recorded against `rel` during this refresh.
    #[must_use]
    pub fn failures_for(&self, rel: &str) -> u32 {
        self.failures.get(rel).copied().unwrap_or(0)
    }

    /// Advance until the next delta or the end of the scan.
    ///
    /// `prior` is the result of applying the previously returned action
    /// (`Status::Ok` on the first call). A vanished source for an add-file or
    /// modify-file is recovered by rescanning the directory from its parent;
    /// any other failure aborts.
    pub fn step(
        &mut self,
        root: &Root,
        ignore: &dyn IgnorePredicate,
        prior: Status,
    ) -> Result<Step> {
        if !self.started {
            self.started = true;
            self.root_name = Some(root.name().to_string());
            let node = root.store().node_id(ROOT_INDEX);
            self.frames.push(Frame::new(node, String::new(), String::new()));
        }

        let last = self.last_action.take();
        if prior != Status::Ok {
            self.absorb_failure(prior, last)?;
        }
        if self.frames.is_empty() {
            return Ok(Step::Finished);
        }
        self.revalidate(root)?;

        loop {
            let Some(depth) = self.frames.len().checked_sub(1) else {
                return Ok(Step::Finished);
            };
            let action = match self.frames[depth].stage {
                Stage::Init => {
                    self.stage_init(root, ignore, depth)?;
                    None
                }
                Stage::Remove => self.stage_remove(root, depth),
                Stage::New => self.stage_new(root, depth),
                Stage::Recur => {
                    self.stage_recur(root, depth);
                    None
                }
                Stage::Return => {
                    self.stage_return(depth);
                    None
                }
                Stage::RedoUpper => {
                    self.stage_redo_upper(depth);
                    None
                }
            };
            if let Some(action) = action {
                self.last_action = Some(action.clone());
                return Ok(Step::Pending(action));
            }
        }
    }

    // ──────────────────── prior results ────────────────────

    fn absorb_failure(&mut self, prior: Status, last: Option<Action>) -> Result<()> {
        let path = last.as_ref().map(|a| a.path.clone()).unwrap_or_default();
        let recoverable = prior == Status::NotFound
            && last
                .as_ref()
                .is_some_and(|a| matches!(a.kind, ActionKind::AddFile | ActionKind::ModifyFile));
        if !recoverable {
            return Err(MirrorError::StepAborted {
                status: prior,
                path,
            });
        }

        self.record_failure(&path)?;
        self.warn(Some(&path), "source vanished before upload, rescanning its directory");
        if self.frames.len() > 1 {
            self.frames.pop();
            if let Some(parent) = self.frames.last_mut() {
                parent.restart();
            }
        } else if let Some(root) = self.frames.last_mut() {
            root.restart();
        }
        Ok(())
    }

    fn record_failure(&mut self, rel: &str) -> Result<()> {
        let count = self.failures.entry(rel.to_string()).or_insert(0);
        *count += 1;
        if *count > self.options.max_failures {
            return Err(MirrorError::RunawayRetry {
                path: rel.to_string(),
                failures: *count,
            });
        }
        Ok(())
    }

    fn warn(&self, path: Option<&str>, details: &str) {
        eprintln!("[TMR-REFRESH] {}: {details}", path.unwrap_or("<root>"));
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::Warning {
                root: self.root_name.clone(),
                path: path.map(str::to_string),
                details: details.to_string(),
            });
        }
    }

    // ──────────────────── revalidation ────────────────────

    /// Rewind to the first frame that no longer matches the index.
    fn revalidate(&mut self, root: &Root) -> Result<()> {
        let store = root.store();
        let Some(first) = self.frames.first() else {
            return Ok(());
        };
        if first.node.index != ROOT_INDEX || store.resolve(first.node).is_none() {
            return Err(MirrorError::RefreshState {
                details: "root frame no longer resolves".to_string(),
            });
        }

        for i in 1..self.frames.len() {
            let frame = &self.frames[i];
            let parent = self.frames[i - 1].node.index;
            let valid = store.resolve(frame.node).is_some_and(|entry| {
                entry.is_dir()
                    && entry.parent == parent
                    && (frame.stage == Stage::Init || store.name_of(frame.node.index) == frame.name)
            });
            if !valid {
                let rel = frame.rel.clone();
                self.record_failure(&rel)?;
                self.frames.truncate(i + 1);
                self.frames[i].stage = Stage::RedoUpper;
                break;
            }
        }
        Ok(())
    }

    // ──────────────────── stages ────────────────────

    fn stage_init(&mut self, root: &Root, ignore: &dyn IgnorePredicate, depth: usize) -> Result<()> {
        let store = root.store();
        let name = store.name_of(self.frames[depth].node.index).to_string();
        let rel = match depth.checked_sub(1) {
            Some(parent) => join_rel(&self.frames[parent].rel, &name),
            None => String::new(),
        };
        let path = local_path(root.local_root(), &rel);

        let listing = match list_directory(&path) {
            Ok(listing) => listing,
            Err(e) => {
                if depth == 0 {
                    self.warn(None, &format!("cannot list backup root: {e}"));
                    self.frames[depth].stage = Stage::Return;
                } else {
                    self.warn(Some(&rel), &format!("directory vanished: {e}"));
                    self.record_failure(&rel)?;
                    self.frames[depth].stage = Stage::RedoUpper;
                }
                return Ok(());
            }
        };
        for skipped in &listing.skipped {
            let child = join_rel(&rel, &skipped.name);
            self.warn(Some(&child), skipped.reason.as_str());
        }

        let mut items = listing.items;
        for item in &mut items {
            item.ignored = ignore.is_ignored(&join_rel(&rel, &item.name), item.is_dir);
        }

        let frame = &mut self.frames[depth];
        frame.name = name;
        frame.rel = rel;
        frame.listing = items;
        frame.cursor = Cursor::Start;
        frame.entry_cursor = 0;
        frame.stage = Stage::Remove;
        Ok(())
    }

    /// Emit a delete for the first child with no live counterpart.
    fn stage_remove(&mut self, root: &Root, depth: usize) -> Option<Action> {
        let store = root.store();
        let frame = &mut self.frames[depth];
        let dir = frame.node.index;

        let mut child = match frame.cursor {
            Cursor::Start => store.entry(dir).first_child,
            Cursor::At(id) => match store.resolve(id) {
                Some(entry) if entry.parent == dir => id.index,
                _ => 0,
            },
            Cursor::End => 0,
        };

        while child != 0 {
            let entry = store.entry(child);
            let name = store.name_of(child);
            let next = entry.next;
            if is_removed(entry, find_item(&frame.listing, name)) {
                frame.cursor = if next == 0 {
                    Cursor::End
                } else {
                    Cursor::At(store.node_id(next))
                };
                let kind = if entry.is_dir() {
                    ActionKind::DeleteDir
                } else {
                    ActionKind::DeleteFile
                };
                return Some(Action::new(kind, join_rel(&frame.rel, name)));
            }
            child = next;
        }

        frame.stage = Stage::New;
        frame.entry_cursor = 0;
        None
    }

    /// Emit an add or modify for the next listed entry that needs one.
    fn stage_new(&mut self, root: &Root, depth: usize) -> Option<Action> {
        let store = root.store();
        let options = self.options;
        let frame = &mut self.frames[depth];
        let dir = frame.node.index;
        let mut retyped = Vec::new();
        let mut pending = None;

        while frame.entry_cursor < frame.listing.len() {
            let item = &frame.listing[frame.entry_cursor];
            frame.entry_cursor += 1;
            if item.ignored {
                continue;
            }
            let rel = join_rel(&frame.rel, &item.name);
            match root.find_child(dir, &item.name) {
                Lookup::Absent { .. } => {
                    let kind = if item.is_dir {
                        ActionKind::AddDir
                    } else {
                        ActionKind::AddFile
                    };
                    pending = Some(Action::new(kind, rel));
                    break;
                }
                Lookup::Found(index) => {
                    let entry = store.entry(index);
                    if entry.is_dir() != item.is_dir {
                        retyped.push(rel);
                        continue;
                    }
                    if !item.is_dir && is_modified(&options, entry, item) {
                        pending = Some(Action::new(ActionKind::ModifyFile, rel));
                        break;
                    }
                }
            }
        }

        if pending.is_none() {
            frame.stage = Stage::Recur;
            frame.cursor = Cursor::Start;
        }
        for rel in retyped {
            self.warn(Some(&rel), "type changed but the old record is still present");
        }
        pending
    }

    /// Descend into the next child directory, or finish this one.
    fn stage_recur(&mut self, root: &Root, depth: usize) {
        let store = root.store();
        let frame = &mut self.frames[depth];
        let dir = frame.node.index;

        let mut child = match frame.cursor {
            Cursor::Start => store.entry(dir).first_child,
            Cursor::At(id) => match store.resolve(id) {
                Some(entry) if entry.parent == dir => id.index,
                _ => {
                    frame.restart();
                    return;
                }
            },
            Cursor::End => 0,
        };

        while child != 0 {
            let entry = store.entry(child);
            let next = entry.next;
            if entry.is_dir() && !entry.is_ignored() {
                let node = store.node_id(child);
                let name = store.name_of(child).to_string();
                let rel = join_rel(&frame.rel, &name);
                if next == 0 {
                    frame.cursor = Cursor::End;
                    frame.stage = Stage::Return;
                } else {
                    frame.cursor = Cursor::At(store.node_id(next));
                }
                self.frames.push(Frame::new(node, name, rel));
                return;
            }
            child = next;
        }

        frame.stage = Stage::Return;
    }

    fn stage_return(&mut self, depth: usize) {
        self.frames.pop();
        if depth > 0 {
            debug_assert!(
                self.frames
                    .last()
                    .is_some_and(|p| matches!(p.stage, Stage::Recur | Stage::Return)),
                "parent frame resumed outside RECUR/RETURN"
            );
        }
    }

    fn stage_redo_upper(&mut self, depth: usize) {
        if depth == 0 {
            self.frames[0].stage = Stage::Return;
            return;
        }
        self.frames.pop();
        if let Some(parent) = self.frames.last_mut() {
            parent.restart();
        }
    }
}

/// Listed entry whose name matches `name` under case folding.
fn find_item<'a>(listing: &'a [FsItem], name: &str) -> Option<&'a FsItem> {
    listing
        .binary_search_by(|item| name_cmp(&item.name, name))
        .ok()
        .map(|i| &listing[i])
}

fn is_removed(entry: &Entry, item: Option<&FsItem>) -> bool {
    match item {
        None => true,
        Some(item) => item.is_dir != entry.is_dir() || item.ignored != entry.is_ignored(),
    }
}

fn is_modified(options: &RefreshOptions, entry: &Entry, item: &FsItem) -> bool {
    (options.retry_pending && entry.is_pending())
        || entry.size != stored_size(item.size)
        || entry.time.abs_diff(item.time) > options.mtime_slack
}
