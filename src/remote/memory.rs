//! In-memory remote for dry runs and tests.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::core::paths::local_path;
use crate::remote::{Remote, RemoteType, Status};

/// One call received by a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    AddDir(String),
    AddFile(String),
    DelDir(String),
    DelFile(String),
    Move { old: String, new: String },
}

/// Records calls and tracks what the remote would hold.
///
/// Paths are kept as `<remote root>/<rel>`.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    entries: BTreeMap<String, RemoteType>,
    calls: Vec<RemoteCall>,
    scripted: HashMap<String, Status>,
    disconnected: bool,
}

fn full(remote_root: &str, rel: &str) -> String {
    if rel.is_empty() {
        remote_root.to_string()
    } else {
        format!("{remote_root}/{rel}")
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.disconnected = !connected;
    }

    /// Answer every call touching `<remote root>/<rel>` with `status`.
    pub fn fail_path(&mut self, full_path: &str, status: Status) {
        self.scripted.insert(full_path.to_string(), status);
    }

    pub fn clear_failures(&mut self) {
        self.scripted.clear();
    }

    #[must_use]
    pub fn calls(&self) -> &[RemoteCall] {
        &self.calls
    }

    /// Forget recorded calls, keeping the remote contents.
    pub fn take_calls(&mut self) -> Vec<RemoteCall> {
        std::mem::take(&mut self.calls)
    }

    #[must_use]
    pub fn contains(&self, full_path: &str) -> bool {
        self.entries.contains_key(full_path)
    }

    /// Every path the remote holds, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn gate(&self, path: &str) -> Option<Status> {
        if self.disconnected {
            return Some(Status::Disconnected);
        }
        self.scripted.get(path).copied()
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }
}

impl Remote for MemoryRemote {
    fn add_dir(&mut self, remote_root: &str, rel: &str) -> Status {
        let path = full(remote_root, rel);
        self.calls.push(RemoteCall::AddDir(path.clone()));
        if let Some(status) = self.gate(&path) {
            return status;
        }
        self.entries.insert(path, RemoteType::Dir);
        Status::Ok
    }

    fn add_file(&mut self, local_root: &Path, remote_root: &str, rel: &str) -> Status {
        let path = full(remote_root, rel);
        self.calls.push(RemoteCall::AddFile(path.clone()));
        if let Some(status) = self.gate(&path) {
            return status;
        }
        if !local_path(local_root, rel).is_file() {
            return Status::NotFound;
        }
        self.entries.insert(path, RemoteType::File);
        Status::Ok
    }

    fn del_dir(&mut self, remote_root: &str, rel: &str) -> Status {
        let path = full(remote_root, rel);
        self.calls.push(RemoteCall::DelDir(path.clone()));
        if let Some(status) = self.gate(&path) {
            return status;
        }
        self.remove_tree(&path);
        Status::Ok
    }

    fn del_file(&mut self, remote_root: &str, rel: &str) -> Status {
        let path = full(remote_root, rel);
        self.calls.push(RemoteCall::DelFile(path.clone()));
        if let Some(status) = self.gate(&path) {
            return status;
        }
        self.entries.remove(&path);
        Status::Ok
    }

    fn get_type(&mut self, full_path: &str) -> RemoteType {
        if self.disconnected {
            return RemoteType::Unknown;
        }
        self.entries
            .get(full_path)
            .copied()
            .unwrap_or(RemoteType::None)
    }

    fn move_file(&mut self, old: &str, new: &str, force: bool) -> Status {
        self.calls.push(RemoteCall::Move {
            old: old.to_string(),
            new: new.to_string(),
        });
        if let Some(status) = self.gate(old) {
            return status;
        }
        let Some(kind) = self.entries.get(old).copied() else {
            return Status::NotFound;
        };
        if self.entries.contains_key(new) {
            if !force {
                return Status::BadParameter;
            }
            self.remove_tree(new);
        }
        self.entries.remove(old);
        self.entries.insert(new.to_string(), kind);
        Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_contents_and_calls() {
        let local = tempfile::tempdir().expect("tempdir");
        std::fs::write(local.path().join("a.txt"), b"a").expect("write");
        let mut remote = MemoryRemote::new();
        assert_eq!(remote.add_dir("docs", "sub"), Status::Ok);
        assert_eq!(remote.add_file(local.path(), "docs", "a.txt"), Status::Ok);
        assert_eq!(remote.get_type("docs/a.txt"), RemoteType::File);
        assert_eq!(remote.get_type("docs/sub"), RemoteType::Dir);
        assert_eq!(
            remote.calls(),
            &[
                RemoteCall::AddDir("docs/sub".to_string()),
                RemoteCall::AddFile("docs/a.txt".to_string()),
            ]
        );
    }

    #[test]
    fn missing_source_is_not_found() {
        let local = tempfile::tempdir().expect("tempdir");
        let mut remote = MemoryRemote::new();
        assert_eq!(remote.add_file(local.path(), "docs", "x"), Status::NotFound);
        assert!(!remote.contains("docs/x"));
    }

    #[test]
    fn scripted_and_disconnected_statuses_win() {
        let local = tempfile::tempdir().expect("tempdir");
        std::fs::write(local.path().join("b.txt"), b"b").expect("write");
        let mut remote = MemoryRemote::new();
        remote.fail_path("docs/b.txt", Status::FileLocked);
        assert_eq!(remote.add_file(local.path(), "docs", "b.txt"), Status::FileLocked);
        remote.clear_failures();
        remote.set_connected(false);
        assert_eq!(remote.add_file(local.path(), "docs", "b.txt"), Status::Disconnected);
        remote.set_connected(true);
        assert_eq!(remote.add_file(local.path(), "docs", "b.txt"), Status::Ok);
    }

    #[test]
    fn del_dir_removes_subtree() {
        let mut remote = MemoryRemote::new();
        remote.add_dir("docs", "d");
        remote.add_dir("docs", "d/e");
        remote.add_dir("docs", "dx");
        assert_eq!(remote.del_dir("docs", "d"), Status::Ok);
        assert_eq!(remote.paths(), vec!["docs/dx".to_string()]);
    }

    #[test]
    fn move_respects_force() {
        let mut remote = MemoryRemote::new();
        remote.add_dir("a", "");
        remote.add_dir("b", "");
        assert_eq!(remote.move_file("a", "b", false), Status::BadParameter);
        assert_eq!(remote.move_file("a", "b", true), Status::Ok);
        assert_eq!(remote.move_file("a", "c", true), Status::NotFound);
    }
}
