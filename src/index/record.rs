//! Fixed 16-byte record codec.
//!
//! Byte layout (all little-endian):
//!
//! | bytes  | field                                                        |
//! |--------|--------------------------------------------------------------|
//! | 0..4   | name offset into the name table                              |
//! | 4..8   | modification time, seconds                                   |
//! | 8..11  | link: next sibling, or the parent when `LAST` is set          |
//! | 11..14 | first child (directory) or size truncated to 24 bits (file)   |
//! | 14     | flags                                                        |
//! | 15     | reserved, written as zero                                    |
//!
//! Slot 0 never holds an entry; its link is the free-list head. Slot 1 is the
//! root directory.

#![allow(missing_docs)]

use bitflags::bitflags;

/// Size of one encoded record.
pub const RECORD_SIZE: usize = 16;

/// Slot holding the free-list head.
pub const FREE_HEAD: u32 = 0;

/// Slot holding the root directory.
pub const ROOT_INDEX: u32 = 1;

/// Largest index a 24-bit link can address.
pub const MAX_INDEX: u32 = 0x00FF_FFFF;

/// Mask applied to file sizes before they are stored or compared.
pub const SIZE_MASK: u64 = 0x00FF_FFFF;

bitflags! {
    /// Flag byte of a record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct RecordFlags: u8 {
        const DIRECTORY = 0x01;
        const ACTIVE = 0x02;
        const IGNORED = 0x04;
        const SYMLINK = 0x08;
        const EXECUTABLE = 0x10;
        const PENDING = 0x20;
        /// Final sibling; the link field then names the parent.
        const LAST = 0x40;
    }
}

/// A record exactly as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawRecord {
    pub name: u32,
    pub time: u32,
    pub link: u32,
    /// First child for directories, truncated size for files.
    pub extra: u32,
    pub flags: RecordFlags,
}

impl RawRecord {
    /// Encode into the fixed on-disk layout.
    ///
    /// `link` and `extra` are truncated to 24 bits.
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.name.to_le_bytes());
        out[4..8].copy_from_slice(&self.time.to_le_bytes());
        out[8..11].copy_from_slice(&self.link.to_le_bytes()[..3]);
        out[11..14].copy_from_slice(&self.extra.to_le_bytes()[..3]);
        out[14] = self.flags.bits();
        out
    }

    /// Decode one record. Unknown flag bits are dropped; the reserved byte is ignored.
    #[must_use]
    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        Self {
            name: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            time: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            link: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], 0]),
            extra: u32::from_le_bytes([bytes[11], bytes[12], bytes[13], 0]),
            flags: RecordFlags::from_bits_truncate(bytes[14]),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.flags.contains(RecordFlags::ACTIVE)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.flags.contains(RecordFlags::DIRECTORY)
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags.contains(RecordFlags::LAST)
    }
}

/// Decode a whole record file; `bytes.len()` must be a multiple of [`RECORD_SIZE`].
#[must_use]
pub fn decode_all(bytes: &[u8]) -> Vec<RawRecord> {
    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut buf = [0u8; RECORD_SIZE];
            buf.copy_from_slice(chunk);
            RawRecord::decode(&buf)
        })
        .collect()
}

/// Truncate a byte size to the stored 24-bit form.
#[must_use]
pub fn stored_size(size: u64) -> u32 {
    u32::try_from(size & SIZE_MASK).unwrap_or(0)
}

/// A slot reference that notices recycling.
///
/// The generation lives only in memory; it changes each time the slot is
/// recycled, so a `NodeId` taken before a delete no longer resolves after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_places_fields_at_documented_offsets() {
        let raw = RawRecord {
            name: 0x0403_0201,
            time: 0x0807_0605,
            link: 0x000B_0A09,
            extra: 0x000E_0D0C,
            flags: RecordFlags::ACTIVE | RecordFlags::LAST,
        };
        let bytes = raw.encode();
        assert_eq!(
            bytes,
            [
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
                0x0E, 0x42, 0x00
            ]
        );
        assert_eq!(RawRecord::decode(&bytes), raw);
    }

    #[test]
    fn link_and_extra_are_truncated_to_24_bits() {
        let raw = RawRecord {
            link: 0x0123_4567,
            extra: 0xFFFF_FFFF,
            ..RawRecord::default()
        };
        let decoded = RawRecord::decode(&raw.encode());
        assert_eq!(decoded.link, 0x0023_4567);
        assert_eq!(decoded.extra, MAX_INDEX);
    }

    #[test]
    fn flag_bits_match_file_format() {
        assert_eq!(RecordFlags::DIRECTORY.bits(), 0x01);
        assert_eq!(RecordFlags::ACTIVE.bits(), 0x02);
        assert_eq!(RecordFlags::IGNORED.bits(), 0x04);
        assert_eq!(RecordFlags::SYMLINK.bits(), 0x08);
        assert_eq!(RecordFlags::EXECUTABLE.bits(), 0x10);
        assert_eq!(RecordFlags::PENDING.bits(), 0x20);
        assert_eq!(RecordFlags::LAST.bits(), 0x40);
    }

    #[test]
    fn unknown_flag_bits_and_reserved_byte_are_ignored() {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[14] = 0x83;
        bytes[15] = 0xAA;
        let raw = RawRecord::decode(&bytes);
        assert_eq!(raw.flags, RecordFlags::DIRECTORY | RecordFlags::ACTIVE);
        assert_eq!(raw.encode()[15], 0);
    }

    #[test]
    fn decode_all_splits_records() {
        let a = RawRecord {
            name: 7,
            ..RawRecord::default()
        };
        let b = RawRecord {
            time: 9,
            ..RawRecord::default()
        };
        let mut bytes = a.encode().to_vec();
        bytes.extend_from_slice(&b.encode());
        assert_eq!(decode_all(&bytes), vec![a, b]);
    }

    #[test]
    fn stored_size_keeps_low_24_bits() {
        assert_eq!(stored_size(10), 10);
        assert_eq!(stored_size(0x0100_0005), 5);
        assert_eq!(stored_size(u64::MAX), MAX_INDEX);
    }
}
