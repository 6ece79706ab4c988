//! Structural integrity checks for a record store.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::core::paths::name_cmp;
use crate::index::record::{FREE_HEAD, ROOT_INDEX};
use crate::index::store::RecordStore;

/// Counts gathered by a successful [`verify_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TreeStats {
    /// Directories, root included.
    pub dirs: u32,
    pub files: u32,
    pub free: u32,
    pub pending: u32,
    pub records: u32,
    pub name_bytes: u64,
}

/// A single structural violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub index: u32,
    pub details: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}: {}", self.index, self.details)
    }
}

fn violation(index: u32, details: impl Into<String>) -> Violation {
    Violation {
        index,
        details: details.into(),
    }
}

/// Check one directory's chain: every child live and named, parent links
/// pointing back at `dir`, names strictly ascending.
pub fn verify_dir(store: &RecordStore, dir: u32) -> Result<(), Violation> {
    let len = store.len();
    let entry = store
        .get(dir)
        .ok_or_else(|| violation(dir, "directory slot out of range"))?;
    if !entry.is_active() || !entry.is_dir() {
        return Err(violation(dir, "not an active directory"));
    }

    let mut previous: Option<&str> = None;
    let mut steps = 0usize;
    let mut child = entry.first_child;
    while child != 0 {
        steps += 1;
        if steps > len {
            return Err(violation(dir, "sibling chain does not terminate"));
        }
        let c = store
            .get(child)
            .filter(|_| child > ROOT_INDEX)
            .ok_or_else(|| violation(dir, format!("child link {child} out of range")))?;
        if !c.is_active() {
            return Err(violation(child, "inactive record in sibling chain"));
        }
        if c.parent != dir {
            return Err(violation(
                child,
                format!("links back to {} instead of {dir}", c.parent),
            ));
        }
        let name = store
            .names()
            .get(c.name)
            .ok_or_else(|| violation(child, format!("name offset {} unreadable", c.name)))?;
        if name.is_empty() {
            return Err(violation(child, "empty name"));
        }
        if let Some(prev) = previous
            && name_cmp(prev, name) != Ordering::Less
        {
            return Err(violation(
                child,
                format!("{name:?} is not ordered after {prev:?}"),
            ));
        }
        previous = Some(name);
        child = c.next;
    }
    Ok(())
}

/// Walk the whole tree and the free list.
///
/// Checks every directory with [`verify_dir`], that the free list is
/// strictly ascending and holds only inactive unnamed slots, and that
/// directories + files + free slots + the reserved slot account for every
/// record.
pub fn verify_tree(store: &RecordStore) -> Result<TreeStats, Violation> {
    let len = store.len();
    if len < 2 {
        return Err(violation(0, "fewer than two records"));
    }
    if store.entry(FREE_HEAD).is_active() {
        return Err(violation(FREE_HEAD, "reserved slot is active"));
    }
    let root = store.entry(ROOT_INDEX);
    if !root.is_active() || !root.is_dir() {
        return Err(violation(ROOT_INDEX, "root is not an active directory"));
    }
    if root.name != 0 {
        return Err(violation(ROOT_INDEX, "root carries a name"));
    }

    let mut stats = TreeStats {
        dirs: 1,
        records: u32::try_from(len).unwrap_or(u32::MAX),
        name_bytes: store.names().len() as u64,
        ..TreeStats::default()
    };

    let mut stack = vec![ROOT_INDEX];
    while let Some(dir) = stack.pop() {
        verify_dir(store, dir)?;
        for child in store.children(dir) {
            let entry = store.entry(child);
            if entry.is_dir() {
                stats.dirs += 1;
                if stats.dirs as usize > len {
                    return Err(violation(child, "directory reachable more than once"));
                }
                stack.push(child);
            } else {
                stats.files += 1;
                if entry.is_pending() {
                    stats.pending += 1;
                }
            }
        }
    }

    let mut prev = FREE_HEAD;
    let mut free = store.entry(FREE_HEAD).next;
    while free != 0 {
        if free <= prev {
            return Err(violation(free, format!("free list not ascending after {prev}")));
        }
        let entry = store
            .get(free)
            .ok_or_else(|| violation(prev, format!("free link {free} out of range")))?;
        if entry.is_active() {
            return Err(violation(free, "active record on the free list"));
        }
        if entry.name != 0 {
            return Err(violation(free, "free record still named"));
        }
        stats.free += 1;
        prev = free;
        free = entry.next;
    }

    let accounted = u64::from(stats.dirs) + u64::from(stats.files) + u64::from(stats.free) + 1;
    if accounted != len as u64 {
        return Err(violation(
            0,
            format!(
                "{} dirs + {} files + {} free + 1 != {len} records",
                stats.dirs, stats.files, stats.free
            ),
        ));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::record::RecordFlags;
    use crate::index::store::{ChangeSet, IndexFiles};

    fn store_with_children(dir: &std::path::Path, names: &[&str]) -> (RecordStore, Vec<u32>) {
        let files = IndexFiles::open(dir).expect("open");
        let mut store = RecordStore::create(files).expect("create");
        let mut changes = ChangeSet::default();
        let mut ids = Vec::new();
        for name in names {
            let id = store.allocate(&mut changes).expect("alloc");
            store.assign_name(id, name, &mut changes).expect("name");
            store.entry_mut(id).parent = ROOT_INDEX;
            ids.push(id);
        }
        for pair in ids.windows(2) {
            store.entry_mut(pair[0]).next = pair[1];
        }
        store.entry_mut(ROOT_INDEX).first_child = ids.first().copied().unwrap_or(0);
        (store, ids)
    }

    #[test]
    fn fresh_store_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store_with_children(dir.path(), &[]);
        let stats = verify_tree(&store).expect("valid");
        assert_eq!(stats.dirs, 1);
        assert_eq!(stats.files, 0);
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn counts_files_dirs_and_free_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, ids) = store_with_children(dir.path(), &["a", "B", "c"]);
        store.entry_mut(ids[1]).flags |= RecordFlags::DIRECTORY;
        let stats = verify_tree(&store).expect("valid");
        assert_eq!((stats.dirs, stats.files, stats.free), (2, 2, 0));

        let mut changes = ChangeSet::default();
        store.entry_mut(ids[1]).next = 0;
        store.recycle(ids[2], &mut changes).expect("recycle");
        let stats = verify_tree(&store).expect("valid after recycle");
        assert_eq!(stats.free, 1);
        assert_eq!(stats.dirs + stats.files + stats.free + 1, stats.records);
    }

    #[test]
    fn detects_misordered_siblings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, ids) = store_with_children(dir.path(), &["beta", "Alpha"]);
        let err = verify_dir(&store, ROOT_INDEX).expect_err("out of order");
        assert_eq!(err.index, ids[1]);
    }

    #[test]
    fn detects_case_only_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (store, _) = store_with_children(dir.path(), &["same", "SAME"]);
        assert!(verify_dir(&store, ROOT_INDEX).is_err());
    }

    #[test]
    fn detects_wrong_loop_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, ids) = store_with_children(dir.path(), &["a", "b"]);
        store.entry_mut(ids[1]).parent = ids[0];
        let err = verify_tree(&store).expect_err("bad back-reference");
        assert!(err.details.contains("links back"), "{err}");
    }

    #[test]
    fn detects_active_record_on_free_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, ids) = store_with_children(dir.path(), &["a"]);
        store.entry_mut(FREE_HEAD).next = ids[0];
        let err = verify_tree(&store).expect_err("active on free list");
        assert!(err.details.contains("free list"), "{err}");
    }

    #[test]
    fn detects_orphaned_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, _) = store_with_children(dir.path(), &["a", "b"]);
        store.entry_mut(ROOT_INDEX).first_child = 0;
        let err = verify_tree(&store).expect_err("orphans break conservation");
        assert!(err.details.contains("records"), "{err}");
    }
}
