//! The `TargetStore` interface shared by every backend.
//!
//! Documents are addressed by `(worker, kind)`. Reads are forgiving: a
//! missing or malformed document is "no target yet". Writes stamp the
//! kind-specific timestamp and bump the document revision.

use hape_core::{epoch_millis, Role, TargetKind, WorkerKey};
use serde_json::Value;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::types::Target;

/// Condition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write unconditionally (last writer wins).
    None,
    /// Write only if the document does not exist.
    DoesNotExist,
    /// Write only if the stored revision matches.
    MatchesRevision(u64),
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Written { revision: u64 },
    /// Nothing was written; `current` is the revision found, if any.
    PreconditionFailed { current: Option<u64> },
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// How a worker's target stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireMode {
    /// Soft: keep a stopped final-target, drop the user-target and heartbeat.
    Stop,
    /// Hard: delete every document and the worker directory.
    Remove,
}

/// Per-worker key-value storage for user-targets, final-targets and heartbeats.
pub trait TargetStore: Send + Sync {
    /// Read a document. Absent or unreadable documents yield `None`.
    fn read(&self, worker: &WorkerKey, kind: TargetKind) -> Option<Target>;

    /// Stamp and persist a document if `precondition` holds.
    fn write_if(
        &self,
        worker: &WorkerKey,
        kind: TargetKind,
        target: &Target,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult>;

    /// Delete a document. Returns whether it existed.
    fn remove(&self, worker: &WorkerKey, kind: TargetKind) -> StoreResult<bool>;

    /// Persist a final-target and consume the user-target it was built from.
    ///
    /// The stored user-target is removed only while it is still the one
    /// given in `consumed` (same user-target stamp); a newer one is kept.
    fn commit(
        &self,
        worker: &WorkerKey,
        final_target: &Target,
        consumed: Option<&Target>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult>;

    /// End a worker's target stream, see [`RetireMode`].
    fn retire(
        &self,
        worker: &WorkerKey,
        mode: RetireMode,
        final_target: &Target,
        consumed: Option<&Target>,
    ) -> StoreResult<()>;

    fn list_domains(&self) -> StoreResult<Vec<String>>;

    fn list_roles(&self, domain: &str) -> StoreResult<Vec<Role>>;

    fn list_workers(&self, domain: &str, role: Role) -> StoreResult<Vec<String>>;

    /// Unconditional write. Returns the new revision.
    fn write(&self, worker: &WorkerKey, kind: TargetKind, target: &Target) -> StoreResult<u64> {
        match self.write_if(worker, kind, target, WritePrecondition::None)? {
            WriteResult::Written { revision } => Ok(revision),
            WriteResult::PreconditionFailed { current } => Err(StoreError::Conflict {
                key: doc_key(worker, kind),
                expected: None,
                current,
            }),
        }
    }

    /// Every worker of every role in a domain.
    fn list_domain_workers(&self, domain: &str) -> StoreResult<Vec<WorkerKey>> {
        let mut keys = Vec::new();
        for role in self.list_roles(domain)? {
            for worker in self.list_workers(domain, role)? {
                keys.push(WorkerKey::new(domain, role, &worker));
            }
        }
        Ok(keys)
    }
}

/// Key of one document: `{domain}/{role}/{worker}/{kind}`.
pub fn doc_key(worker: &WorkerKey, kind: TargetKind) -> String {
    format!("{}/{}", worker.table_key(), kind.file_stem())
}

/// Whether `precondition` holds against the stored revision.
pub(crate) fn check_precondition(precondition: WritePrecondition, current: Option<u64>) -> bool {
    match precondition {
        WritePrecondition::None => true,
        WritePrecondition::DoesNotExist => current.is_none(),
        WritePrecondition::MatchesRevision(expected) => current == Some(expected),
    }
}

/// Prepare a document for writing on top of `previous`.
///
/// Sets the kind, bumps the revision and stamps the kind's timestamp.
/// Stamps strictly increase per document so a rewritten user-target is
/// never mistaken for the one it replaced. `consumed` is the final-target's
/// consumption marker: a new user-target is always stamped after it, even
/// once the consumed one has been deleted.
pub(crate) fn stamp(
    target: &Target,
    kind: TargetKind,
    previous: Option<&Target>,
    consumed: Option<i64>,
) -> Target {
    let mut doc = target.clone();
    doc.kind = kind;
    doc.revision = previous.map_or(0, |p| p.revision) + 1;

    let floor = previous
        .and_then(|p| p.timestamps.get(kind))
        .into_iter()
        .chain(consumed)
        .max()
        .map_or(i64::MIN, |t| t + 1);
    doc.timestamps.set(kind, epoch_millis().max(floor));
    doc
}

/// Consumption marker a new `kind` document must be stamped after.
pub(crate) fn consumed_floor(kind: TargetKind, final_target: Option<&Target>) -> Option<i64> {
    match kind {
        TargetKind::UserTarget => final_target.and_then(|f| f.consumed_user_target),
        _ => None,
    }
}

/// Set the consumption marker when a user-target is consumed.
pub(crate) fn mark_consumed(final_target: &Target, consumed: Option<&Target>) -> Target {
    let mut doc = final_target.clone();
    if let Some(stamp) = consumed.and_then(Target::user_stamp) {
        doc.consumed_user_target = Some(stamp);
    }
    doc
}

pub(crate) fn encode(target: &Target) -> StoreResult<Vec<u8>> {
    serde_json::to_vec_pretty(target).map_err(|e| StoreError::Serialize(e.to_string()))
}

/// Parse a stored document. Documents written without a `type` tag get
/// the kind they are stored under.
pub(crate) fn decode(key: &str, kind: TargetKind, bytes: &[u8]) -> Option<Target> {
    let mut value: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(%key, error = %e, "ignoring malformed target document");
            return None;
        }
    };
    if let Value::Object(map) = &mut value {
        if !map.contains_key("type") {
            if let Ok(tag) = serde_json::to_value(kind) {
                map.insert("type".to_string(), tag);
            }
        }
    }
    match serde_json::from_value(value) {
        Ok(target) => Some(target),
        Err(e) => {
            warn!(%key, error = %e, "ignoring malformed target document");
            None
        }
    }
}
