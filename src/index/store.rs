//! Slot arena backing one backup root's index.
//!
//! Entries carry explicit `parent`, `next` and `first_child` links plus an
//! in-memory generation counter. The on-disk "last sibling points at its
//! parent" packing is produced and consumed only by [`RecordStore::encode`]
//! and [`RecordStore::from_disk`].
//!
//! Every mutation marks the slots it touched in a [`ChangeSet`]; callers hand
//! that set to [`RecordStore::flush`] before returning so each operation is
//! durable on its own. Name bytes are written as soon as they change.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::errors::{MirrorError, Result};
use crate::index::names::NameTable;
use crate::index::record::{
    FREE_HEAD, MAX_INDEX, NodeId, RECORD_SIZE, ROOT_INDEX, RawRecord, RecordFlags, decode_all,
};

/// File holding the record array.
pub const RECORD_FILE: &str = "record";
/// File holding the name table.
pub const NAME_FILE: &str = "rname";

/// One arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Entry {
    pub name: u32,
    pub time: u32,
    /// Truncated 24-bit size; zero for directories.
    pub size: u32,
    /// Never contains `LAST`; that bit is derived when encoding.
    pub flags: RecordFlags,
    pub parent: u32,
    /// Next sibling, or next free slot for recycled entries. 0 ends the chain.
    pub next: u32,
    pub first_child: u32,
    pub generation: u32,
}

impl Entry {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.flags.contains(RecordFlags::ACTIVE)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(RecordFlags::DIRECTORY)
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.flags.contains(RecordFlags::IGNORED)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.flags.contains(RecordFlags::PENDING)
    }
}

/// Indices touched by one operation.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    indices: Vec<u32>,
}

impl ChangeSet {
    pub fn mark(&mut self, index: u32) {
        self.indices.push(index);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sorted, duplicate-free indices.
    #[must_use]
    pub fn into_sorted(mut self) -> Vec<u32> {
        self.indices.sort_unstable();
        self.indices.dedup();
        self.indices
    }
}

// ──────────────────── files ────────────────────

/// Open handles on the `record` and `rname` files.
pub struct IndexFiles {
    record_path: PathBuf,
    name_path: PathBuf,
    record: File,
    names: File,
}

impl IndexFiles {
    /// Open (creating if needed) both files in `dir` without truncating them.
    pub fn open(dir: &Path) -> Result<Self> {
        let record_path = dir.join(RECORD_FILE);
        let name_path = dir.join(NAME_FILE);
        let record = open_rw(&record_path)?;
        let names = open_rw(&name_path)?;
        Ok(Self {
            record_path,
            name_path,
            record,
            names,
        })
    }

    #[must_use]
    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    #[must_use]
    pub fn name_path(&self) -> &Path {
        &self.name_path
    }

    /// Read both files from the start.
    pub fn read_all(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let records = read_whole(&mut self.record, &self.record_path)?;
        let names = read_whole(&mut self.names, &self.name_path)?;
        Ok((records, names))
    }

    /// Replace both files' contents.
    pub fn rewrite(&mut self, records: &[u8], names: &[u8]) -> Result<()> {
        replace_contents(&mut self.record, &self.record_path, records)?;
        replace_contents(&mut self.names, &self.name_path, names)
    }

    fn write_record(&mut self, index: u32, bytes: &[u8; RECORD_SIZE]) -> Result<()> {
        let offset = u64::from(index) * RECORD_SIZE as u64;
        self.record
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.record.write_all(bytes))
            .map_err(|e| MirrorError::io(&self.record_path, e))
    }

    fn write_names(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.names
            .seek(SeekFrom::Start(offset as u64))
            .and_then(|_| self.names.write_all(bytes))
            .map_err(|e| MirrorError::io(&self.name_path, e))
    }

    /// Flush both files to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.record
            .sync_data()
            .map_err(|e| MirrorError::io(&self.record_path, e))?;
        self.names
            .sync_data()
            .map_err(|e| MirrorError::io(&self.name_path, e))
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| MirrorError::io(path, e))
}

fn read_whole(file: &mut File, path: &Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut buf))
        .map_err(|e| MirrorError::io(path, e))?;
    Ok(buf)
}

fn replace_contents(file: &mut File, path: &Path, bytes: &[u8]) -> Result<()> {
    file.set_len(0)
        .and_then(|()| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(bytes))
        .map_err(|e| MirrorError::io(path, e))
}

#[inline]
const fn slot(index: u32) -> usize {
    index as usize
}

// ──────────────────── arena ────────────────────

/// Record array, name table and their durable files.
pub struct RecordStore {
    entries: Vec<Entry>,
    names: NameTable,
    files: IndexFiles,
}

impl RecordStore {
    /// Initialise a fresh index: empty name, free-list head, root directory.
    pub fn create(files: IndexFiles) -> Result<Self> {
        let root = Entry {
            flags: RecordFlags::DIRECTORY | RecordFlags::ACTIVE,
            ..Entry::default()
        };
        let mut store = Self {
            entries: vec![Entry::default(), root],
            names: NameTable::new(),
            files,
        };
        let records = store.encode_all();
        let names = store.names.as_bytes().to_vec();
        store.files.rewrite(&records, &names)?;
        Ok(store)
    }

    /// Rebuild the arena from file contents.
    ///
    /// Restores parent links by walking every chain from the root. Problems
    /// that would stop the walk are reported here, as is a chain that fails
    /// to end on a last-flagged record linking back to its directory. The
    /// remaining structural checks live in [`crate::index::verify`].
    pub fn from_disk(files: IndexFiles, record_bytes: &[u8], name_bytes: Vec<u8>) -> Result<Self> {
        let path = files.record_path().to_path_buf();
        let raw = decode_all(record_bytes);
        let count = raw.len();
        if count < 2 {
            return Err(MirrorError::corrupt(&path, "fewer than two records"));
        }
        if count > slot(MAX_INDEX) + 1 {
            return Err(MirrorError::corrupt(
                &path,
                format!("{count} records exceed the 24-bit index space"),
            ));
        }

        let mut entries: Vec<Entry> = raw
            .iter()
            .map(|r| {
                let dir = r.is_dir();
                Entry {
                    name: r.name,
                    time: r.time,
                    size: if dir { 0 } else { r.extra },
                    flags: r.flags - RecordFlags::LAST,
                    parent: 0,
                    next: 0,
                    first_child: if dir { r.extra } else { 0 },
                    generation: 0,
                }
            })
            .collect();

        for (index, r) in raw.iter().enumerate() {
            let entry = &mut entries[index];
            if index == slot(ROOT_INDEX) {
                if r.link != 0 || r.is_last() {
                    return Err(MirrorError::corrupt(&path, "root record carries a link"));
                }
            } else if index == slot(FREE_HEAD) || !r.is_active() {
                entry.next = r.link;
            } else if r.is_last() {
                entry.parent = r.link;
            } else {
                entry.next = r.link;
            }
        }

        let mut seen = vec![false; count];
        seen[slot(ROOT_INDEX)] = true;
        let mut stack = vec![ROOT_INDEX];
        while let Some(dir) = stack.pop() {
            let mut child = entries[slot(dir)].first_child;
            while child != 0 {
                let c = slot(child);
                if c >= count || child == ROOT_INDEX {
                    return Err(MirrorError::corrupt(
                        &path,
                        format!("directory {dir} links to invalid slot {child}"),
                    ));
                }
                if seen[c] {
                    return Err(MirrorError::corrupt(
                        &path,
                        format!("slot {child} is reachable twice"),
                    ));
                }
                seen[c] = true;
                let entry = &mut entries[c];
                if !entry.is_active() {
                    return Err(MirrorError::corrupt(
                        &path,
                        format!("inactive slot {child} linked under directory {dir}"),
                    ));
                }
                if raw[c].is_last() {
                    if entry.parent != dir {
                        return Err(MirrorError::corrupt(
                            &path,
                            format!(
                                "chain under directory {dir} ends at slot {child} pointing to {}",
                                entry.parent
                            ),
                        ));
                    }
                } else if entry.next == 0 {
                    return Err(MirrorError::corrupt(
                        &path,
                        format!(
                            "chain under directory {dir} ends at slot {child} without a last flag"
                        ),
                    ));
                } else {
                    entry.parent = dir;
                }
                if entry.is_dir() {
                    stack.push(child);
                }
                child = entry.next;
            }
        }

        Ok(Self {
            entries,
            names: NameTable::from_bytes(name_bytes),
            files,
        })
    }

    // ──────────────────── reads ────────────────────

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`; panics on out-of-range indices, which are bugs.
    #[must_use]
    pub fn entry(&self, index: u32) -> &Entry {
        &self.entries[slot(index)]
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<&Entry> {
        self.entries.get(slot(index))
    }

    #[must_use]
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    #[must_use]
    pub fn files(&self) -> &IndexFiles {
        &self.files
    }

    /// Name of the record at `index`.
    #[must_use]
    pub fn name_of(&self, index: u32) -> &str {
        self.names.name(self.entry(index).name)
    }

    #[must_use]
    pub fn node_id(&self, index: u32) -> NodeId {
        NodeId {
            index,
            generation: self.entry(index).generation,
        }
    }

    /// The entry behind `id`, if it is still the same live record.
    #[must_use]
    pub fn resolve(&self, id: NodeId) -> Option<&Entry> {
        self.get(id.index)
            .filter(|e| e.generation == id.generation && e.is_active() && id.index != FREE_HEAD)
    }

    /// Children of `dir` in sibling order.
    pub fn children(&self, dir: u32) -> impl Iterator<Item = u32> + '_ {
        let mut next = self.entry(dir).first_child;
        std::iter::from_fn(move || {
            if next == 0 {
                return None;
            }
            let current = next;
            next = self.entry(current).next;
            Some(current)
        })
    }

    /// On-disk form of one slot.
    #[must_use]
    pub fn encode(&self, index: u32) -> RawRecord {
        let e = self.entry(index);
        let mut flags = e.flags;
        let link = if index == FREE_HEAD || !e.is_active() {
            e.next
        } else if index == ROOT_INDEX {
            0
        } else if e.next == 0 {
            flags |= RecordFlags::LAST;
            e.parent
        } else {
            e.next
        };
        let extra = if e.is_dir() { e.first_child } else { e.size };
        RawRecord {
            name: e.name,
            time: e.time,
            link,
            extra,
            flags,
        }
    }

    /// Encoded record file contents.
    #[must_use]
    pub fn encode_all(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * RECORD_SIZE);
        for index in 0..self.entries.len() {
            let index = u32::try_from(index).unwrap_or(MAX_INDEX);
            out.extend_from_slice(&self.encode(index).encode());
        }
        out
    }

    // ──────────────────── writes ────────────────────

    pub(crate) fn entry_mut(&mut self, index: u32) -> &mut Entry {
        &mut self.entries[slot(index)]
    }

    /// Take a slot from the free list, or grow the array.
    ///
    /// The returned slot is active, unlinked and otherwise zeroed.
    pub fn allocate(&mut self, changes: &mut ChangeSet) -> Result<u32> {
        let head = self.entries[slot(FREE_HEAD)].next;
        let index = if head == 0 {
            let index = u32::try_from(self.entries.len())
                .ok()
                .filter(|i| *i <= MAX_INDEX)
                .ok_or(MirrorError::IndexFull { limit: MAX_INDEX })?;
            self.entries.push(Entry::default());
            index
        } else {
            self.entries[slot(FREE_HEAD)].next = self.entries[slot(head)].next;
            changes.mark(FREE_HEAD);
            head
        };
        let entry = &mut self.entries[slot(index)];
        *entry = Entry {
            flags: RecordFlags::ACTIVE,
            generation: entry.generation,
            ..Entry::default()
        };
        changes.mark(index);
        Ok(index)
    }

    /// Append `name` to the name table and point `index` at it.
    pub fn assign_name(&mut self, index: u32, name: &str, changes: &mut ChangeSet) -> Result<()> {
        if self.names.len() + name.len() + 1 > u32::MAX as usize {
            return Err(MirrorError::Runtime {
                details: "name table exceeds 4 GiB".to_string(),
            });
        }
        let (offset, range) = self.names.append(name);
        let start = range.start;
        let bytes = self.names.slice(range).to_vec();
        self.files.write_names(start, &bytes)?;
        self.entry_mut(index).name = offset;
        changes.mark(index);
        Ok(())
    }

    /// Zero-fill the record's name on disk and clear its offset.
    pub fn erase_name(&mut self, index: u32, changes: &mut ChangeSet) -> Result<()> {
        let offset = self.entry(index).name;
        if let Some(range) = self.names.erase(offset) {
            let start = range.start;
            let zeros = vec![0u8; range.len()];
            self.files.write_names(start, &zeros)?;
        }
        self.entry_mut(index).name = 0;
        changes.mark(index);
        Ok(())
    }

    /// Retire a detached slot onto the free list, keeping it ascending.
    pub fn recycle(&mut self, index: u32, changes: &mut ChangeSet) -> Result<()> {
        debug_assert!(index > ROOT_INDEX, "slot {index} cannot be recycled");
        self.erase_name(index, changes)?;

        let mut prev = FREE_HEAD;
        let mut cur = self.entries[slot(FREE_HEAD)].next;
        while cur != 0 && cur < index {
            prev = cur;
            cur = self.entries[slot(cur)].next;
        }

        let entry = &mut self.entries[slot(index)];
        *entry = Entry {
            next: cur,
            generation: entry.generation.wrapping_add(1),
            ..Entry::default()
        };
        self.entries[slot(prev)].next = index;
        changes.mark(prev);
        changes.mark(index);
        Ok(())
    }

    /// Persist every slot in `changes`, one positioned write each.
    pub fn flush(&mut self, changes: ChangeSet) -> Result<()> {
        for index in changes.into_sorted() {
            let bytes = self.encode(index).encode();
            self.files.write_record(index, &bytes)?;
        }
        Ok(())
    }

    /// Sync both files to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.files.sync()
    }
}
