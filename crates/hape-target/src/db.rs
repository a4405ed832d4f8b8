//! RedbTargetStore — transactional target storage backed by redb.
//!
//! Unlike the filesystem layout, every conditional write, commit and
//! retirement runs in a single write transaction, so consuming a
//! user-target and persisting the final-target are one atomic step.
//! The store is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use hape_core::{Role, TargetKind, WorkerKey};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::*;
use crate::tables::TARGETS;
use crate::types::Target;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Read one document inside an open table.
macro_rules! get_doc {
    ($table:expr, $key:expr, $kind:expr) => {
        match $table.get($key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(&$key, $kind, guard.value()),
            None => None,
        }
    };
}

#[derive(Clone)]
pub struct RedbTargetStore {
    db: Arc<Database>,
}

impl RedbTargetStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = match Database::create(path) {
            Ok(db) => db,
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                return Err(StoreError::Locked(path.display().to_string()));
            }
            Err(e) => return Err(StoreError::Open(e.to_string())),
        };
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "redb target store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory target store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Every stored key, parsed into worker identity.
    fn workers(&self) -> StoreResult<BTreeSet<WorkerKey>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut workers = BTreeSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            match parse_doc_key(key.value()) {
                Some(worker) => {
                    workers.insert(worker);
                }
                None => warn!(key = key.value(), "skipping unrecognised target key"),
            }
        }
        Ok(workers)
    }
}

impl TargetStore for RedbTargetStore {
    fn read(&self, worker: &WorkerKey, kind: TargetKind) -> Option<Target> {
        let key = doc_key(worker, kind);
        let lookup = || -> StoreResult<Option<Target>> {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            Ok(get_doc!(table, key, kind))
        };
        match lookup() {
            Ok(target) => target,
            Err(e) => {
                warn!(%key, error = %e, "target unreadable");
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
        let key = doc_key(worker, kind);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let revision;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            let previous = get_doc!(table, key, kind);
            let current = previous.as_ref().map(|p| p.revision);
            if !check_precondition(precondition, current) {
                return Ok(WriteResult::PreconditionFailed { current });
            }
            let final_key = doc_key(worker, TargetKind::FinalTarget);
            let final_target = match kind {
                TargetKind::UserTarget => get_doc!(table, final_key, TargetKind::FinalTarget),
                _ => None,
            };
            let doc = stamp(target, kind, previous.as_ref(), consumed_floor(kind, final_target.as_ref()));
            let value = encode(&doc)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            revision = doc.revision;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, revision, "target written");
        Ok(WriteResult::Written { revision })
    }

    fn remove(&self, worker: &WorkerKey, kind: TargetKind) -> StoreResult<bool> {
        let key = doc_key(worker, kind);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "target removed");
        Ok(existed)
    }

    fn commit(
        &self,
        worker: &WorkerKey,
        final_target: &Target,
        consumed: Option<&Target>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        let final_key = doc_key(worker, TargetKind::FinalTarget);
        let user_key = doc_key(worker, TargetKind::UserTarget);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let revision;
        {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            let previous = get_doc!(table, final_key, TargetKind::FinalTarget);
            let current = previous.as_ref().map(|p| p.revision);
            if !check_precondition(precondition, current) {
                return Ok(WriteResult::PreconditionFailed { current });
            }

            let marked = mark_consumed(final_target, consumed);
            let doc = stamp(&marked, TargetKind::FinalTarget, previous.as_ref(), None);
            let value = encode(&doc)?;
            table
                .insert(final_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            revision = doc.revision;

            if let Some(user) = consumed {
                let pending = get_doc!(table, user_key, TargetKind::UserTarget);
                match pending {
                    Some(p) if p.user_stamp() == user.user_stamp() => {
                        table.remove(user_key.as_str()).map_err(map_err!(Write))?;
                    }
                    Some(_) => debug!(%worker, "newer user-target arrived, leaving it pending"),
                    None => {}
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%final_key, revision, "final-target committed");
        Ok(WriteResult::Written { revision })
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
            }
            RetireMode::Remove => {
                let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
                {
                    let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
                    for kind in TargetKind::ALL {
                        table
                            .remove(doc_key(worker, kind).as_str())
                            .map_err(map_err!(Write))?;
                    }
                }
                txn.commit().map_err(map_err!(Transaction))?;
            }
        }
        debug!(%worker, ?mode, "worker retired");
        Ok(())
    }

    fn list_domains(&self) -> StoreResult<Vec<String>> {
        let domains: BTreeSet<String> = self.workers()?.into_iter().map(|w| w.domain).collect();
        Ok(domains.into_iter().collect())
    }

    fn list_roles(&self, domain: &str) -> StoreResult<Vec<Role>> {
        let roles: BTreeSet<Role> = self
            .workers()?
            .into_iter()
            .filter(|w| w.domain == domain)
            .map(|w| w.role)
            .collect();
        Ok(roles.into_iter().collect())
    }

    fn list_workers(&self, domain: &str, role: Role) -> StoreResult<Vec<String>> {
        Ok(self
            .workers()?
            .into_iter()
            .filter(|w| w.domain == domain && w.role == role)
            .map(|w| w.worker)
            .collect())
    }
}

/// Parse `{domain}/{role}/{worker}/{kind}` back into the worker identity.
fn parse_doc_key(key: &str) -> Option<WorkerKey> {
    let mut parts = key.split('/');
    let domain = parts.next()?;
    let role: Role = parts.next()?.parse().ok()?;
    let worker = parts.next()?;
    let _kind: TargetKind = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(WorkerKey::new(domain, role, worker))
}
