//! The four index mutations behind [`Root::perform`].

use crate::apply::{ApplyError, ApplyResult, remote_outcome};
use crate::core::paths::{join_rel, local_path, split_parent};
use crate::index::record::{ROOT_INDEX, RecordFlags, stored_size};
use crate::index::root::{Located, Lookup, Root};
use crate::index::store::ChangeSet;
use crate::logger::activity::ActivityEvent;
use crate::remote::{Remote, Status};
use crate::scanner::listing::{dir_time, file_attr};

fn fail<T>(status: Status) -> ApplyResult<T> {
    Err(ApplyError::Status(status))
}

impl Root {
    /// Ensure `rel` exists as a directory, creating missing parents first.
    /// Returns the directory's slot.
    pub(crate) fn add_dir(&mut self, rel: &str, remote: &mut dyn Remote) -> ApplyResult<u32> {
        let (parent_rel, name) = split_parent(rel);
        if name.is_empty() {
            return fail(Status::BadParameter);
        }
        let parent = match parent_rel {
            Some(p) => self.add_dir(p, remote)?,
            None => ROOT_INDEX,
        };

        let after = match self.find_child(parent, name) {
            Lookup::Found(index) if self.store().entry(index).is_dir() => return Ok(index),
            Lookup::Found(_) => return fail(Status::Conflict),
            Lookup::Absent { after } => after,
        };

        remote_outcome(remote.add_dir(self.name(), rel))?;

        let time = dir_time(&local_path(self.local_root(), rel));
        let mut changes = ChangeSet::default();
        let index = self.store_mut().allocate(&mut changes)?;
        self.store_mut().assign_name(index, name, &mut changes)?;
        let entry = self.store_mut().entry_mut(index);
        entry.flags |= RecordFlags::DIRECTORY;
        entry.time = time;
        self.link_child(parent, index, after, &mut changes);
        self.store_mut().flush(changes)?;

        self.emit(ActivityEvent::DirAdded {
            root: self.name().to_string(),
            path: rel.to_string(),
        });
        Ok(index)
    }

    /// Upload `rel` and record its size and time.
    ///
    /// A record that already matches exactly (and is not pending) is left
    /// alone without contacting the remote. A locked source marks the record
    /// pending and keeps its previous metadata.
    pub(crate) fn add_file(&mut self, rel: &str, remote: &mut dyn Remote) -> ApplyResult<()> {
        let (parent_rel, name) = split_parent(rel);
        if name.is_empty() {
            return fail(Status::BadParameter);
        }
        let parent = match parent_rel {
            Some(p) => self.add_dir(p, remote)?,
            None => ROOT_INDEX,
        };

        let Ok(attr) = file_attr(&local_path(self.local_root(), rel)) else {
            return fail(Status::NotFound);
        };
        let size = stored_size(attr.size);

        let (existing, after) = match self.find_child(parent, name) {
            Lookup::Found(index) => {
                let entry = self.store().entry(index);
                if entry.is_dir() {
                    return fail(Status::Conflict);
                }
                if !entry.is_pending() && entry.time == attr.time && entry.size == size {
                    return Ok(());
                }
                (Some(index), None)
            }
            Lookup::Absent { after } => (None, after),
        };

        let locked = match remote.add_file(self.local_root(), self.name(), rel) {
            Status::Ok => false,
            Status::FileLocked => true,
            Status::NotFound => return fail(Status::NotFound),
            other => {
                remote_outcome(other)?;
                false
            }
        };

        let mut changes = ChangeSet::default();
        let index = match existing {
            Some(index) => index,
            None => {
                let index = self.store_mut().allocate(&mut changes)?;
                self.store_mut().assign_name(index, name, &mut changes)?;
                self.link_child(parent, index, after, &mut changes);
                index
            }
        };
        let entry = self.store_mut().entry_mut(index);
        if locked {
            entry.flags |= RecordFlags::PENDING;
        } else {
            entry.time = attr.time;
            entry.size = size;
            entry.flags -= RecordFlags::PENDING;
            entry.flags.set(RecordFlags::EXECUTABLE, attr.executable);
        }
        changes.mark(index);
        self.store_mut().flush(changes)?;

        let root = self.name().to_string();
        let path = rel.to_string();
        self.emit(match (locked, existing.is_some()) {
            (true, _) => ActivityEvent::FilePending { root, path },
            (false, true) => ActivityEvent::FileModified {
                root,
                path,
                size_bytes: attr.size,
            },
            (false, false) => ActivityEvent::FileAdded {
                root,
                path,
                size_bytes: attr.size,
            },
        });
        Ok(())
    }

    pub(crate) fn delete_file(&mut self, rel: &str, remote: &mut dyn Remote) -> ApplyResult<()> {
        let located = self.locate(rel)?;
        if self.store().entry(located.index).is_dir() {
            return fail(Status::NotFound);
        }
        self.delete_leaf(located, rel, remote)
    }

    pub(crate) fn delete_dir(&mut self, rel: &str, remote: &mut dyn Remote) -> ApplyResult<()> {
        let located = self.locate(rel)?;
        if !self.store().entry(located.index).is_dir() {
            return fail(Status::NotFound);
        }
        self.delete_tree(located, rel, remote)
    }

    fn locate(&self, rel: &str) -> ApplyResult<Located> {
        match self.find_path(rel) {
            Some(located) if located.index == ROOT_INDEX => fail(Status::BadParameter),
            Some(located) => Ok(located),
            None => fail(Status::NotFound),
        }
    }

    /// Delete every child (remote, then index), then the directory itself.
    fn delete_tree(
        &mut self,
        located: Located,
        rel: &str,
        remote: &mut dyn Remote,
    ) -> ApplyResult<()> {
        loop {
            let child = self.store().entry(located.index).first_child;
            if child == 0 {
                break;
            }
            let child_rel = join_rel(rel, self.store().name_of(child));
            let child_loc = Located {
                parent: located.index,
                index: child,
            };
            if self.store().entry(child).is_dir() {
                self.delete_tree(child_loc, &child_rel, remote)?;
            } else {
                self.delete_leaf(child_loc, &child_rel, remote)?;
            }
        }
        self.delete_leaf(located, rel, remote)
    }

    /// Remove one record remotely, then unlink and recycle it.
    ///
    /// Records flagged ignored were never sent, so the remote is skipped.
    fn delete_leaf(
        &mut self,
        located: Located,
        rel: &str,
        remote: &mut dyn Remote,
    ) -> ApplyResult<()> {
        let entry = *self.store().entry(located.index);
        if !entry.is_ignored() {
            let status = if entry.is_dir() {
                remote.del_dir(self.name(), rel)
            } else {
                remote.del_file(self.name(), rel)
            };
            remote_outcome(status)?;
        }

        let mut changes = ChangeSet::default();
        self.unlink_child(located.parent, located.index, &mut changes);
        self.store_mut().recycle(located.index, &mut changes)?;
        self.store_mut().flush(changes)?;

        let root = self.name().to_string();
        let path = rel.to_string();
        self.emit(if entry.is_dir() {
            ActivityEvent::DirDeleted { root, path }
        } else {
            ActivityEvent::FileDeleted { root, path }
        });
        Ok(())
    }
}
