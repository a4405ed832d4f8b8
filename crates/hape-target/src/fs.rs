//! FsTargetStore — target documents as JSON files on a shared filesystem.
//!
//! Layout: `<root>/<domain>/<role>/<worker>/heartbeats/<worker>-<kind>.json`.
//! The worker daemon reads its final-target and writes its heartbeat in
//! the same tree. Files are replaced by write-to-temp + rename, so a
//! reader never observes a half-written document. There is no locking:
//! conditional writes compare revisions just before writing and are only
//! as strong as the filesystem allows.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use hape_core::{Role, TargetKind, WorkerKey};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::*;
use crate::types::Target;

macro_rules! io_err {
    ($path:expr) => {
        |e| StoreError::Io(format!("{}: {}", $path.display(), e))
    };
}

#[derive(Debug, Clone)]
pub struct FsTargetStore {
    root: PathBuf,
}

impl FsTargetStore {
    /// Open a store rooted at `root`, creating the directory if absent.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root).map_err(|e| StoreError::Open(format!("{}: {e}", root.display())))?;
        debug!(?root, "fs target store opened");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<domain>/<role>/<worker>`
    pub fn worker_dir(&self, worker: &WorkerKey) -> PathBuf {
        self.root
            .join(&worker.domain)
            .join(worker.role.as_str())
            .join(&worker.worker)
    }

    /// Path of one document.
    pub fn target_path(&self, worker: &WorkerKey, kind: TargetKind) -> PathBuf {
        self.worker_dir(worker)
            .join("heartbeats")
            .join(format!("{}-{}.json", worker.worker, kind.file_stem()))
    }

    fn write_doc(&self, worker: &WorkerKey, kind: TargetKind, doc: &Target) -> StoreResult<()> {
        let path = self.target_path(worker, kind);
        write_atomic(&path, &encode(doc)?)?;
        debug!(%worker, %kind, revision = doc.revision, "target written");
        Ok(())
    }

    /// Remove the user-target if it is still the consumed one.
    fn consume(&self, worker: &WorkerKey, consumed: &Target) -> StoreResult<()> {
        let stored = self.read(worker, TargetKind::UserTarget);
        match stored {
            Some(current) if current.user_stamp() == consumed.user_stamp() => {
                self.remove(worker, TargetKind::UserTarget)?;
            }
            Some(_) => {
                debug!(%worker, "newer user-target arrived, leaving it pending");
            }
            None => {}
        }
        Ok(())
    }
}

impl TargetStore for FsTargetStore {
    fn read(&self, worker: &WorkerKey, kind: TargetKind) -> Option<Target> {
        let path = self.target_path(worker, kind);
        match fs::read(&path) {
            Ok(bytes) => decode(&path.display().to_string(), kind, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "target unreadable");
                None
            }
        }
    }

    fn write_if(
        &self,
        worker: &WorkerKey,
        kind: TargetKind,
        target: &Target,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        let previous = self.read(worker, kind);
        let current = previous.as_ref().map(|p| p.revision);
        if !check_precondition(precondition, current) {
            return Ok(WriteResult::PreconditionFailed { current });
        }
        let final_target = match kind {
            TargetKind::UserTarget => self.read(worker, TargetKind::FinalTarget),
            _ => None,
        };
        let doc = stamp(target, kind, previous.as_ref(), consumed_floor(kind, final_target.as_ref()));
        self.write_doc(worker, kind, &doc)?;
        Ok(WriteResult::Written {
            revision: doc.revision,
        })
    }

    fn remove(&self, worker: &WorkerKey, kind: TargetKind) -> StoreResult<bool> {
        let path = self.target_path(worker, kind);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%worker, %kind, "target removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(format!("{}: {e}", path.display()))),
        }
    }

    fn commit(
        &self,
        worker: &WorkerKey,
        final_target: &Target,
        consumed: Option<&Target>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        let marked = mark_consumed(final_target, consumed);
        let result = self.write_if(worker, TargetKind::FinalTarget, &marked, precondition)?;
        if result.is_written() {
            if let Some(user) = consumed {
                self.consume(worker, user)?;
            }
        }
        Ok(result)
    }

    fn retire(
        &self,
        worker: &WorkerKey,
        mode: RetireMode,
        final_target: &Target,
        consumed: Option<&Target>,
    ) -> StoreResult<()> {
        match mode {
            RetireMode::Stop => {
                self.commit(worker, final_target, consumed, WritePrecondition::None)?;
                self.remove(worker, TargetKind::Heartbeat)?;
                debug!(%worker, "worker retired (stop)");
            }
            RetireMode::Remove => {
                let dir = self.worker_dir(worker);
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::Io(format!("{}: {e}", dir.display()))),
                }
                debug!(%worker, "worker retired (remove)");
            }
        }
        Ok(())
    }

    fn list_domains(&self) -> StoreResult<Vec<String>> {
        list_dirs(&self.root)
    }

    fn list_roles(&self, domain: &str) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = list_dirs(&self.root.join(domain))?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        roles.sort();
        Ok(roles)
    }

    fn list_workers(&self, domain: &str, role: Role) -> StoreResult<Vec<String>> {
        let role_dir = self.root.join(domain).join(role.as_str());
        Ok(list_dirs(&role_dir)?
            .into_iter()
            .filter(|name| role_dir.join(name).join("heartbeats").is_dir())
            .collect())
    }
}

/// Sorted names of the sub-directories of `dir`; empty if `dir` is absent.
fn list_dirs(dir: &Path) -> StoreResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Io(format!("{}: {e}", dir.display()))),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err!(dir))?;
        if entry.file_type().map_err(io_err!(dir))?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Io(format!("{}: no parent directory", path.display())))?;
    fs::create_dir_all(parent).map_err(io_err!(parent))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::Io(format!("{}: invalid file name", path.display())))?;
    let tmp_path = parent.join(format!(".{name}.{}.tmp", std::process::id()));
    {
        let mut file = fs::File::create(&tmp_path).map_err(io_err!(tmp_path))?;
        file.write_all(data).map_err(io_err!(tmp_path))?;
        file.sync_all().map_err(io_err!(tmp_path))?;
    }
    fs::rename(&tmp_path, path).map_err(io_err!(path))?;
    Ok(())
}
