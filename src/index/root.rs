//! One backup root: its record store, lock and lookups.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::core::errors::{MirrorError, Result};
use crate::core::paths::{name_cmp, segments};
use crate::index::record::{RECORD_SIZE, ROOT_INDEX};
use crate::index::store::{ChangeSet, IndexFiles, NAME_FILE, RECORD_FILE, RecordStore};
use crate::index::verify::{self, TreeStats};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

#[cfg(unix)]
type LockGuard = nix::fcntl::Flock<File>;
#[cfg(not(unix))]
type LockGuard = ();

/// Result of searching one sibling chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(u32),
    /// Not present; a new entry belongs after `after` (or first when `None`).
    Absent { after: Option<u32> },
}

/// A record together with its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub parent: u32,
    pub index: u32,
}

/// The persistent index of one backup root.
pub struct Root {
    name: String,
    local_root: PathBuf,
    record_dir: PathBuf,
    store: RecordStore,
    logger: Option<ActivityLoggerHandle>,
    _lock: LockGuard,
}

impl Root {
    /// Open the index in `record_dir` for the backup `name` rooted at `local_root`.
    ///
    /// Creates the directory and a fresh index when none exists, takes an
    /// exclusive lock, and refuses to continue if the stored tree fails
    /// verification.
    pub fn load(name: &str, local_root: &Path, record_dir: &Path) -> Result<Self> {
        fs::create_dir_all(record_dir).map_err(|e| MirrorError::io(record_dir, e))?;
        let lock = acquire_lock(record_dir)?;

        let record_path = record_dir.join(RECORD_FILE);
        let name_path = record_dir.join(NAME_FILE);
        let record_len = match fs::metadata(&record_path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(MirrorError::io(&record_path, e)),
        };
        if let Some(len) = record_len {
            if len % RECORD_SIZE as u64 != 0 {
                return Err(MirrorError::IndexFormat {
                    path: record_path,
                    details: format!("size {len} is not a multiple of {RECORD_SIZE}"),
                });
            }
            if len >= 2 * RECORD_SIZE as u64 && !name_path.exists() {
                return Err(MirrorError::corrupt(
                    &name_path,
                    "record file present but name table missing",
                ));
            }
        }

        let mut files = IndexFiles::open(record_dir)?;
        let (record_bytes, name_bytes) = files.read_all()?;
        let fresh = record_bytes.len() < 2 * RECORD_SIZE;
        let store = if fresh {
            RecordStore::create(files)?
        } else {
            RecordStore::from_disk(files, &record_bytes, name_bytes)?
        };

        let root = Self {
            name: name.to_string(),
            local_root: local_root.to_path_buf(),
            record_dir: record_dir.to_path_buf(),
            store,
            logger: None,
            _lock: lock,
        };
        root.verify()?;
        Ok(root)
    }

    /// Attach an activity logger; emits a `root_loaded` event.
    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        let stats = self.stats();
        logger.send(ActivityEvent::RootLoaded {
            root: self.name.clone(),
            records: stats.records,
            dirs: stats.dirs,
            files: stats.files,
            free: stats.free,
        });
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    #[must_use]
    pub fn record_dir(&self) -> &Path {
        &self.record_dir
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub(crate) fn emit(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    // ──────────────────── integrity ────────────────────

    /// Full-tree verification; any violation is reported as corruption.
    pub fn verify(&self) -> Result<TreeStats> {
        verify::verify_tree(&self.store).map_err(|v| {
            MirrorError::corrupt(self.store.files().record_path(), v.to_string())
        })
    }

    /// Record counts; zeroed if the tree no longer verifies.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        verify::verify_tree(&self.store).unwrap_or_default()
    }

    /// Verify a single directory chain.
    pub fn verify_dir(&self, dir: u32) -> Result<()> {
        verify::verify_dir(&self.store, dir).map_err(|v| {
            MirrorError::corrupt(self.store.files().record_path(), v.to_string())
        })
    }

    /// Encoded record file and name table as they should be on disk.
    #[must_use]
    pub fn encoded(&self) -> (Vec<u8>, Vec<u8>) {
        (self.store.encode_all(), self.store.names().as_bytes().to_vec())
    }

    /// Whether both files on disk match the in-memory state byte for byte.
    pub fn check_persisted(&self) -> Result<bool> {
        let record_path = self.store.files().record_path();
        let name_path = self.store.files().name_path();
        let records = fs::read(record_path).map_err(|e| MirrorError::io(record_path, e))?;
        let names = fs::read(name_path).map_err(|e| MirrorError::io(name_path, e))?;
        let (want_records, want_names) = self.encoded();
        Ok(records == want_records && names == want_names)
    }

    /// Sync the index files to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    // ──────────────────── lookups ────────────────────

    /// Search `dir`'s sorted chain for `name`.
    #[must_use]
    pub fn find_child(&self, dir: u32, name: &str) -> Lookup {
        let mut after = None;
        for child in self.store.children(dir) {
            match name_cmp(self.store.name_of(child), name) {
                Ordering::Less => after = Some(child),
                Ordering::Equal => return Lookup::Found(child),
                Ordering::Greater => break,
            }
        }
        Lookup::Absent { after }
    }

    /// Resolve a root-relative path. The empty path is the root itself.
    #[must_use]
    pub fn find_path(&self, rel: &str) -> Option<Located> {
        let mut located = Located {
            parent: 0,
            index: ROOT_INDEX,
        };
        for segment in segments(rel) {
            if !self.store.entry(located.index).is_dir() {
                return None;
            }
            match self.find_child(located.index, segment) {
                Lookup::Found(child) => {
                    located = Located {
                        parent: located.index,
                        index: child,
                    };
                }
                Lookup::Absent { .. } => return None,
            }
        }
        Some(located)
    }

    /// Root-relative path of `index`, rebuilt from parent links.
    #[must_use]
    pub fn path_of(&self, index: u32) -> String {
        let mut parts = Vec::new();
        let mut current = index;
        while current != ROOT_INDEX && current != 0 && parts.len() < self.store.len() {
            parts.push(self.store.name_of(current));
            current = self.store.entry(current).parent;
        }
        parts.reverse();
        parts.join("/")
    }

    // ──────────────────── chain edits ────────────────────

    /// Splice a fresh, unlinked record into `dir`'s chain.
    pub(crate) fn link_child(
        &mut self,
        dir: u32,
        child: u32,
        after: Option<u32>,
        changes: &mut ChangeSet,
    ) {
        let store = &mut self.store;
        let next = match after {
            Some(prev) => {
                let next = store.entry(prev).next;
                store.entry_mut(prev).next = child;
                changes.mark(prev);
                next
            }
            None => {
                let next = store.entry(dir).first_child;
                store.entry_mut(dir).first_child = child;
                changes.mark(dir);
                next
            }
        };
        let entry = store.entry_mut(child);
        entry.parent = dir;
        entry.next = next;
        changes.mark(child);
        debug_assert!(
            verify::verify_dir(store, dir).is_ok(),
            "sibling order broken after inserting slot {child} under {dir}"
        );
    }

    /// Remove `child` from `dir`'s chain, leaving it unlinked.
    pub(crate) fn unlink_child(&mut self, dir: u32, child: u32, changes: &mut ChangeSet) {
        let store = &mut self.store;
        let next = store.entry(child).next;
        let prev = store.children(dir).take_while(|c| *c != child).last();
        match prev {
            Some(prev) => {
                store.entry_mut(prev).next = next;
                changes.mark(prev);
            }
            None => {
                store.entry_mut(dir).first_child = next;
                changes.mark(dir);
            }
        }
        let entry = store.entry_mut(child);
        entry.next = 0;
        entry.parent = 0;
        changes.mark(child);
        debug_assert!(
            verify::verify_dir(store, dir).is_ok(),
            "chain of {dir} broken after removing slot {child}"
        );
    }
}

#[cfg(unix)]
fn acquire_lock(dir: &Path) -> Result<LockGuard> {
    let lock_path = dir.join(".lock");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| MirrorError::io(&lock_path, e))?;

    #[allow(deprecated)]
    nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusiveNonblock).map_err(
        |(_file, errno)| {
            if errno == nix::errno::Errno::EWOULDBLOCK {
                MirrorError::IndexLocked {
                    path: dir.to_path_buf(),
                }
            } else {
                MirrorError::Runtime {
                    details: format!("failed to lock {}: {errno}", dir.display()),
                }
            }
        },
    )
}

#[cfg(not(unix))]
fn acquire_lock(dir: &Path) -> Result<LockGuard> {
    let lock_path = dir.join(".lock");
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| MirrorError::io(&lock_path, e))?;
    Ok(())
}
