//! Remote store abstraction and the transports shipped with the crate.
//!
//! A [`Remote`] receives paths relative to its own base. `remote_root` is the
//! backup's name on the remote side and `rel` the path inside that backup.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;

use serde::Serialize;

pub mod local;
pub mod memory;

pub use local::LocalDirRemote;
pub use memory::MemoryRemote;

/// Outcome of one remote or apply operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    /// The remote is unreachable; the whole pass should stop.
    Disconnected,
    /// A file sits where a directory is wanted, or the reverse.
    Conflict,
    RemoteError,
    /// The local source vanished.
    NotFound,
    NotImplemented,
    BadParameter,
    Internal,
    Cancelled,
    /// The local source exists but could not be read.
    FileLocked,
}

impl Status {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Disconnected => "disconnected",
            Self::Conflict => "conflict",
            Self::RemoteError => "remote_error",
            Self::NotFound => "not_found",
            Self::NotImplemented => "not_implemented",
            Self::BadParameter => "bad_parameter",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
            Self::FileLocked => "file_locked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What occupies a path on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    None,
    File,
    Dir,
    Link,
    Unknown,
}

/// Capabilities the apply layer needs from a remote store.
pub trait Remote {
    /// Create `rel` as a directory under `remote_root`.
    fn add_dir(&mut self, remote_root: &str, rel: &str) -> Status;

    /// Upload `local_root/rel` to `remote_root/rel`.
    ///
    /// Implementations stage the content at a temporary location and move it
    /// into place, so a partial upload never replaces a good copy.
    fn add_file(&mut self, local_root: &Path, remote_root: &str, rel: &str) -> Status;

    fn del_dir(&mut self, remote_root: &str, rel: &str) -> Status;

    fn del_file(&mut self, remote_root: &str, rel: &str) -> Status;

    /// Type of the entry at `full`, a path relative to the remote base.
    fn get_type(&mut self, full: &str) -> RemoteType;

    /// Rename between two paths relative to the remote base.
    ///
    /// With `force`, an existing destination is replaced and missing parent
    /// directories are created.
    fn move_file(&mut self, old: &str, new: &str, force: bool) -> Status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_serialized_name() {
        for status in [
            Status::Ok,
            Status::Disconnected,
            Status::Conflict,
            Status::RemoteError,
            Status::NotFound,
            Status::NotImplemented,
            Status::BadParameter,
            Status::Internal,
            Status::Cancelled,
            Status::FileLocked,
        ] {
            let json = serde_json::to_string(&status).expect("serialize");
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn only_ok_is_ok() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::FileLocked.is_ok());
    }
}
