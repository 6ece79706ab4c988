//! Apply layer: turn one [`Action`] into a remote change, then an index change.
//!
//! The remote is always changed first. A failed remote call leaves the index
//! untouched, so the index never claims state the remote has not confirmed.

#![allow(missing_docs)]

use std::fmt;

use serde::Serialize;

use crate::core::errors::{MirrorError, Result};
use crate::index::root::Root;
use crate::logger::activity::ActivityEvent;
use crate::remote::{Remote, Status};

mod mutate;

/// Kind of change the refresh engine detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    None,
    AddDir,
    DeleteDir,
    AddFile,
    DeleteFile,
    ModifyFile,
}

impl ActionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AddDir => "add_dir",
            Self::DeleteDir => "delete_dir",
            Self::AddFile => "add_file",
            Self::DeleteFile => "delete_file",
            Self::ModifyFile => "modify_file",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending change, addressed by root-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    pub path: String,
}

impl Action {
    pub fn new(kind: ActionKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path)
    }
}

/// Failure inside an apply operation.
///
/// `Status` ends the operation with a reportable outcome; `Fatal` is a local
/// index I/O failure that ends the root.
#[derive(Debug)]
pub(crate) enum ApplyError {
    Status(Status),
    Fatal(MirrorError),
}

impl From<MirrorError> for ApplyError {
    fn from(err: MirrorError) -> Self {
        Self::Fatal(err)
    }
}

pub(crate) type ApplyResult<T> = std::result::Result<T, ApplyError>;

/// Map a remote answer for the apply layer: disconnects pass through, other
/// rejections become `RemoteError`.
pub(crate) fn remote_outcome(status: Status) -> ApplyResult<()> {
    match status {
        Status::Ok => Ok(()),
        Status::Disconnected => Err(ApplyError::Status(Status::Disconnected)),
        _ => Err(ApplyError::Status(Status::RemoteError)),
    }
}

impl Root {
    /// Apply `action` against `remote`, then the index.
    ///
    /// `Ok` carries the outcome; `Err` is reserved for local index I/O
    /// failures, after which this root must not be used further.
    pub fn perform(&mut self, action: &Action, remote: &mut dyn Remote) -> Result<Status> {
        let outcome = match action.kind {
            ActionKind::None => return Ok(Status::NotImplemented),
            ActionKind::AddDir => self.add_dir(&action.path, remote).map(|_| ()),
            ActionKind::AddFile | ActionKind::ModifyFile => self.add_file(&action.path, remote),
            ActionKind::DeleteDir => self.delete_dir(&action.path, remote),
            ActionKind::DeleteFile => self.delete_file(&action.path, remote),
        };
        match outcome {
            Ok(()) => Ok(Status::Ok),
            Err(ApplyError::Status(status)) => {
                self.emit(ActivityEvent::RemoteFailed {
                    root: self.name().to_string(),
                    path: action.path.clone(),
                    action: action.kind.to_string(),
                    status: status.to_string(),
                });
                Ok(status)
            }
            Err(ApplyError::Fatal(err)) => Err(err),
        }
    }
}
