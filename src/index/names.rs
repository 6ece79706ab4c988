//! Append-only table of NUL-terminated names.
//!
//! Offset 0 always holds a single NUL, so a zero offset reads as the empty
//! name. Erasing zero-fills in place; the bytes are never reclaimed.

#![allow(missing_docs)]

use std::ops::Range;

/// In-memory copy of the `rname` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTable {
    bytes: Vec<u8>,
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTable {
    /// Fresh table holding only the empty name.
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: vec![0] }
    }

    /// Wrap bytes loaded from disk.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Name stored at `offset`, or `None` if the offset is outside the table,
    /// unterminated, or not UTF-8.
    #[must_use]
    pub fn get(&self, offset: u32) -> Option<&str> {
        let start = usize::try_from(offset).ok()?;
        let tail = self.bytes.get(start..)?;
        let end = memchr::memchr(0, tail)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    /// Name at `offset`, empty when unreadable.
    #[must_use]
    pub fn name(&self, offset: u32) -> &str {
        self.get(offset).unwrap_or("")
    }

    /// Append `name` plus its terminator.
    ///
    /// Returns the new offset and the byte range that must be persisted.
    pub fn append(&mut self, name: &str) -> (u32, Range<usize>) {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        let offset = u32::try_from(start).unwrap_or(u32::MAX);
        (offset, start..self.bytes.len())
    }

    /// Zero-fill the name at `offset`, returning the range that changed.
    ///
    /// Offset 0 is the shared empty name and is left alone.
    pub fn erase(&mut self, offset: u32) -> Option<Range<usize>> {
        if offset == 0 {
            return None;
        }
        let start = usize::try_from(offset).ok()?;
        let tail = self.bytes.get_mut(start..)?;
        let end = memchr::memchr(0, tail)?;
        tail[..end].fill(0);
        Some(start..start + end)
    }

    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.bytes[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_reads_empty_name_at_zero() {
        let table = NameTable::new();
        assert_eq!(table.as_bytes(), &[0]);
        assert_eq!(table.get(0), Some(""));
        assert_eq!(table.get(5), None);
    }

    #[test]
    fn append_returns_offset_and_dirty_range() {
        let mut table = NameTable::new();
        let (first, range) = table.append("docs");
        assert_eq!(first, 1);
        assert_eq!(range, 1..6);
        assert_eq!(table.slice(range), b"docs\0");
        let (second, _) = table.append("a.txt");
        assert_eq!(second, 6);
        assert_eq!(table.get(first), Some("docs"));
        assert_eq!(table.get(second), Some("a.txt"));
    }

    #[test]
    fn erase_zero_fills_without_shrinking() {
        let mut table = NameTable::new();
        let (offset, _) = table.append("old");
        let before = table.len();
        let range = table.erase(offset).expect("erasable");
        assert_eq!(range, 1..4);
        assert_eq!(table.len(), before);
        assert_eq!(table.get(offset), Some(""));
        assert_eq!(table.erase(0), None);
    }

    #[test]
    fn unterminated_tail_is_unreadable() {
        let table = NameTable::from_bytes(vec![0, b'a', b'b']);
        assert_eq!(table.get(1), None);
        assert_eq!(table.name(1), "");
    }
}
