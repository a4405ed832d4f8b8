//! Distribution channel — persist a final-target, then push it to the worker.

use std::sync::Arc;

use hape_core::{TargetKind, WorkerKey};
use hape_runtime::WorkerRuntime;
use hape_target::{doc_key, RetireMode, StoreError, Target, TargetStore, WritePrecondition, WriteResult};
use tracing::{debug, info, warn};

use crate::error::ReconcileResult;

/// Writes final-targets through the store and hands them to the runtime.
///
/// Persistence errors are returned. Delivery is fire-and-forget: a failed
/// push is logged and the worker picks the target up from the store.
pub struct Distributor {
    store: Arc<dyn TargetStore>,
    runtime: Arc<dyn WorkerRuntime>,
    compare_and_swap: bool,
}

impl Distributor {
    pub fn new(
        store: Arc<dyn TargetStore>,
        runtime: Arc<dyn WorkerRuntime>,
        compare_and_swap: bool,
    ) -> Self {
        Self {
            store,
            runtime,
            compare_and_swap,
        }
    }

    /// Precondition for a final-target write based on the revision the
    /// handler read (`None` when there was no final-target yet).
    fn precondition(&self, read_revision: Option<u64>) -> WritePrecondition {
        if !self.compare_and_swap {
            return WritePrecondition::None;
        }
        match read_revision {
            Some(revision) => WritePrecondition::MatchesRevision(revision),
            None => WritePrecondition::DoesNotExist,
        }
    }

    /// Commit `final_target`, consuming `consumed` if given, then deliver it.
    pub fn distribute(
        &self,
        worker: &WorkerKey,
        final_target: &Target,
        read_revision: Option<u64>,
        consumed: Option<&Target>,
    ) -> ReconcileResult<()> {
        let precondition = self.precondition(read_revision);
        let revision = match self
            .store
            .commit(worker, final_target, consumed, precondition)?
        {
            WriteResult::Written { revision } => revision,
            WriteResult::PreconditionFailed { current } => {
                return Err(StoreError::Conflict {
                    key: doc_key(worker, TargetKind::FinalTarget),
                    expected: read_revision,
                    current,
                }
                .into());
            }
        };
        debug!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            revision,
            "final-target committed"
        );

        let stored = self.store.read(worker, TargetKind::FinalTarget);
        let delivered = stored.as_ref().unwrap_or(final_target);
        if let Err(e) =
            self.runtime
                .deliver_target(worker, &delivered.plan.processor_info, delivered)
        {
            warn!(
                domain = %worker.domain,
                role = %worker.role,
                worker = %worker.worker,
                error = %e,
                "final-target delivery failed, worker will read it from the store"
            );
        }
        Ok(())
    }

    /// End the worker's target stream.
    pub fn retire(
        &self,
        worker: &WorkerKey,
        mode: RetireMode,
        final_target: &Target,
        consumed: Option<&Target>,
    ) -> ReconcileResult<()> {
        self.store.retire(worker, mode, final_target, consumed)?;
        info!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            ?mode,
            "worker retired"
        );
        Ok(())
    }
}
