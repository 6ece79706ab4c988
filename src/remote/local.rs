//! Transport that mirrors backups into a directory on a mounted filesystem.
//!
//! Each backup lands at `<target>/<backup name>/...`. Uploads are staged in
//! `<target>/.treemirror-tmp/` and renamed into place.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::random;

use crate::core::paths::local_path;
use crate::remote::{Remote, RemoteType, Status};

/// Staging directory for in-flight uploads, relative to the target.
pub const STAGING_DIR: &str = ".treemirror-tmp";

/// Default upload chunk: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Mirror into a local (or mounted) directory.
pub struct LocalDirRemote {
    target: PathBuf,
    chunk_size: usize,
    connected: bool,
    forced_offline: bool,
}

impl LocalDirRemote {
    /// Attach to `target`; the remote reports disconnected until it exists.
    #[must_use]
    pub fn connect(target: &Path, chunk_size: usize) -> Self {
        let mut remote = Self {
            target: target.to_path_buf(),
            chunk_size: chunk_size.max(1),
            connected: true,
            forced_offline: false,
        };
        remote.connected = remote.target_available();
        remote
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Force the disconnected state; every later call fails fast.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.forced_offline = true;
    }

    fn target_available(&self) -> bool {
        fs::metadata(&self.target).is_ok_and(|m| m.is_dir())
    }

    /// Re-check the target before each operation.
    fn online(&mut self) -> bool {
        if self.forced_offline {
            return false;
        }
        let available = self.target_available();
        if self.connected && !available {
            eprintln!(
                "[TMR-REMOTE] target {} is no longer available",
                self.target.display()
            );
        } else if !self.connected && available {
            eprintln!("[TMR-REMOTE] target {} is back", self.target.display());
        }
        self.connected = available;
        self.connected
    }

    fn remote_path(&self, remote_root: &str, rel: &str) -> PathBuf {
        local_path(&self.target.join(remote_root), rel)
    }

    fn staging_name() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        format!(
            "{STAGING_DIR}/{millis}.{}.{:08x}",
            std::process::id(),
            random::<u32>()
        )
    }

    /// Copy `source` into `staged` chunk by chunk.
    fn copy_chunked(&self, source: &Path, staged: &Path) -> Status {
        let mut input = match File::open(source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Status::NotFound,
            Err(_) => return Status::FileLocked,
        };
        if let Some(parent) = staged.parent()
            && fs::create_dir_all(parent).is_err()
        {
            return Status::Disconnected;
        }
        let Ok(mut output) = File::create(staged) else {
            return Status::Disconnected;
        };

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Status::FileLocked,
            };
            if output.write_all(&buf[..n]).is_err() {
                return Status::Disconnected;
            }
        }
        if output.sync_all().is_err() {
            return Status::Disconnected;
        }
        Status::Ok
    }
}

impl Remote for LocalDirRemote {
    fn add_dir(&mut self, remote_root: &str, rel: &str) -> Status {
        if !self.online() {
            return Status::Disconnected;
        }
        let path = self.remote_path(remote_root, rel);
        match fs::create_dir(&path) {
            Ok(()) => Status::Ok,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match fs::symlink_metadata(&path) {
                    Ok(meta) if meta.is_dir() => Status::Ok,
                    Ok(_) => {
                        if fs::remove_file(&path).and_then(|()| fs::create_dir(&path)).is_ok() {
                            Status::Ok
                        } else {
                            Status::RemoteError
                        }
                    }
                    Err(_) => Status::RemoteError,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::create_dir_all(&path).is_ok() {
                    Status::Ok
                } else {
                    Status::RemoteError
                }
            }
            Err(_) => Status::RemoteError,
        }
    }

    fn add_file(&mut self, local_root: &Path, remote_root: &str, rel: &str) -> Status {
        if !self.online() {
            return Status::Disconnected;
        }
        let staged_rel = Self::staging_name();
        let staged = self.target.join(&staged_rel);
        let mut status = self.copy_chunked(&local_path(local_root, rel), &staged);
        if status.is_ok() {
            let dest = format!("{remote_root}/{rel}");
            status = self.move_file(&staged_rel, &dest, true);
        }
        if !status.is_ok() {
            let _ = fs::remove_file(&staged);
        }
        status
    }

    fn del_dir(&mut self, remote_root: &str, rel: &str) -> Status {
        if !self.online() {
            return Status::Disconnected;
        }
        match fs::remove_dir_all(self.remote_path(remote_root, rel)) {
            Ok(()) => Status::Ok,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Status::Ok,
            Err(_) => Status::RemoteError,
        }
    }

    fn del_file(&mut self, remote_root: &str, rel: &str) -> Status {
        if !self.online() {
            return Status::Disconnected;
        }
        match fs::remove_file(self.remote_path(remote_root, rel)) {
            Ok(()) => Status::Ok,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Status::Ok,
            Err(_) => Status::RemoteError,
        }
    }

    fn get_type(&mut self, full: &str) -> RemoteType {
        if !self.online() {
            return RemoteType::Unknown;
        }
        match fs::symlink_metadata(local_path(&self.target, full)) {
            Ok(meta) if meta.file_type().is_symlink() => RemoteType::Link,
            Ok(meta) if meta.is_dir() => RemoteType::Dir,
            Ok(meta) if meta.is_file() => RemoteType::File,
            Ok(_) => RemoteType::Unknown,
            Err(e) if e.kind() == io::ErrorKind::NotFound => RemoteType::None,
            Err(_) => RemoteType::Unknown,
        }
    }

    fn move_file(&mut self, old: &str, new: &str, force: bool) -> Status {
        if !self.online() {
            return Status::Disconnected;
        }
        let from = local_path(&self.target, old);
        let to = local_path(&self.target, new);
        if fs::rename(&from, &to).is_ok() {
            return Status::Ok;
        }
        if !from.exists() {
            return Status::NotFound;
        }
        if !force {
            return Status::BadParameter;
        }
        match self.get_type(new) {
            RemoteType::Dir => {
                let _ = fs::remove_dir_all(&to);
            }
            RemoteType::File | RemoteType::Link => {
                let _ = fs::remove_file(&to);
            }
            RemoteType::None | RemoteType::Unknown => {}
        }
        if let Some(parent) = to.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if fs::rename(&from, &to).is_ok() {
            Status::Ok
        } else {
            Status::BadParameter
        }
    }
}
