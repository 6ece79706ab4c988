//! Physical directory listing and file attributes.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::paths::{listing_cmp, names_equal};

/// One physical entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsItem {
    pub name: String,
    pub is_dir: bool,
    /// Full byte size; zero for directories.
    pub size: u64,
    /// Modification time, whole seconds since the epoch.
    pub time: u32,
    pub executable: bool,
    /// Set by the refresh engine from the ignore predicate.
    pub ignored: bool,
}

/// Why a physical entry was left out of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonUtf8Name,
    DirectorySymlink,
    DanglingSymlink,
    /// Same name as an earlier entry up to ASCII case.
    CaseDuplicate,
    Unreadable,
    /// Sockets, fifos and devices.
    Special,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonUtf8Name => "name is not valid UTF-8",
            Self::DirectorySymlink => "symlink to a directory",
            Self::DanglingSymlink => "dangling symlink",
            Self::CaseDuplicate => "differs from another entry only in case",
            Self::Unreadable => "metadata unreadable",
            Self::Special => "not a regular file or directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub name: String,
    pub reason: SkipReason,
}

/// Sorted, case-deduplicated contents of one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<FsItem>,
    pub skipped: Vec<Skipped>,
}

/// Attributes of a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    pub time: u32,
    pub executable: bool,
}

/// List `dir`, sorted by folded name with raw bytes as the tie-breaker.
///
/// Symlinks to files are followed; symlinks to directories and dangling links
/// are skipped, as are names that are not UTF-8. When names collide up to
/// ASCII case, the first in listing order is kept.
pub fn list_directory(dir: &Path) -> io::Result<Listing> {
    let mut listing = Listing::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                listing.skipped.push(Skipped {
                    name: raw.to_string_lossy().into_owned(),
                    reason: SkipReason::NonUtf8Name,
                });
                continue;
            }
        };
        let Ok(ft) = entry.file_type() else {
            listing.skipped.push(Skipped {
                name,
                reason: SkipReason::Unreadable,
            });
            continue;
        };

        let meta = if ft.is_symlink() {
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => {
                    listing.skipped.push(Skipped {
                        name,
                        reason: SkipReason::DirectorySymlink,
                    });
                    continue;
                }
                Ok(meta) => meta,
                Err(_) => {
                    listing.skipped.push(Skipped {
                        name,
                        reason: SkipReason::DanglingSymlink,
                    });
                    continue;
                }
            }
        } else {
            match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => {
                    listing.skipped.push(Skipped {
                        name,
                        reason: SkipReason::Unreadable,
                    });
                    continue;
                }
            }
        };

        if !meta.is_dir() && !meta.is_file() {
            listing.skipped.push(Skipped {
                name,
                reason: SkipReason::Special,
            });
            continue;
        }
        let is_dir = meta.is_dir();
        listing.items.push(FsItem {
            name,
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            time: mtime_secs(&meta),
            executable: !is_dir && is_executable(&meta),
            ignored: false,
        });
    }

    listing.items.sort_by(|a, b| listing_cmp(&a.name, &b.name));
    let mut kept: Vec<FsItem> = Vec::with_capacity(listing.items.len());
    for item in listing.items.drain(..) {
        if kept.last().is_some_and(|prev| names_equal(&prev.name, &item.name)) {
            listing.skipped.push(Skipped {
                name: item.name,
                reason: SkipReason::CaseDuplicate,
            });
        } else {
            kept.push(item);
        }
    }
    listing.items = kept;
    Ok(listing)
}

/// Size, time and executable bit of a file, following symlinks.
pub fn file_attr(path: &Path) -> io::Result<FileAttr> {
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        return Err(io::Error::other(format!("{} is a directory", path.display())));
    }
    Ok(FileAttr {
        size: meta.len(),
        time: mtime_secs(&meta),
        executable: is_executable(&meta),
    })
}

/// A directory's modification time, or 0 when it cannot be read.
#[must_use]
pub fn dir_time(path: &Path) -> u32 {
    fs::metadata(path).map_or(0, |meta| mtime_secs(&meta))
}

fn mtime_secs(meta: &fs::Metadata) -> u32 {
    let secs = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(listing: &Listing) -> Vec<&str> {
        listing.items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn sorts_case_insensitively() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.txt", "A.txt", "c"] {
            fs::write(dir.path().join(name), name).expect("write");
        }
        fs::create_dir(dir.path().join("B-dir")).expect("mkdir");
        let listing = list_directory(dir.path()).expect("list");
        assert_eq!(names(&listing), vec!["A.txt", "B-dir", "b.txt", "c"]);
        let bdir = &listing.items[1];
        assert!(bdir.is_dir);
        assert_eq!(bdir.size, 0);
        assert_eq!(listing.items[2].size, 5);
    }

    #[test]
    fn records_mtime_in_seconds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f");
        fs::write(&path, b"x").expect("write");
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_600_000_000, 0))
            .expect("set mtime");
        let listing = list_directory(dir.path()).expect("list");
        assert_eq!(listing.items[0].time, 1_600_000_000);
        assert_eq!(file_attr(&path).expect("attr").time, 1_600_000_000);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(list_directory(&dir.path().join("gone")).is_err());
        assert_eq!(dir_time(&dir.path().join("gone")), 0);
    }

    #[cfg(unix)]
    #[test]
    fn follows_file_links_but_not_directory_links() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("real.txt"), b"abc").expect("write");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .expect("file link");
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("loop"))
            .expect("dir link");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("dangling"))
            .expect("dangling link");

        let listing = list_directory(dir.path()).expect("list");
        assert_eq!(names(&listing), vec!["link.txt", "real.txt", "sub"]);
        assert_eq!(listing.items[0].size, 3);
        let reasons: Vec<SkipReason> = listing.skipped.iter().map(|s| s.reason).collect();
        assert!(reasons.contains(&SkipReason::DirectorySymlink));
        assert!(reasons.contains(&SkipReason::DanglingSymlink));
    }

    #[cfg(unix)]
    #[test]
    fn drops_case_duplicates_after_the_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("Readme"), b"1").expect("write");
        fs::write(dir.path().join("README"), b"2").expect("write");
        let listing = list_directory(dir.path()).expect("list");
        if listing.skipped.is_empty() {
            // Case-insensitive filesystem: only one file exists.
            assert_eq!(listing.items.len(), 1);
            return;
        }
        assert_eq!(names(&listing), vec!["README"]);
        assert_eq!(listing.skipped[0].name, "Readme");
        assert_eq!(listing.skipped[0].reason, SkipReason::CaseDuplicate);
    }

    #[cfg(unix)]
    #[test]
    fn reports_executable_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.sh");
        fs::write(&path, b"#!/bin/sh").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        assert!(file_attr(&path).expect("attr").executable);
        assert!(file_attr(dir.path()).is_err());
    }
}
