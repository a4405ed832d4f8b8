//! Load freshly built indexes into searchers once every builder has finished.

use std::collections::BTreeMap;

use hape_core::{Role, TargetKind, UserCmd, WorkerKey, WorkerStatus};
use hape_target::{IndexInfo, Target};
use tracing::{debug, info};

use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

/// Replaces a searcher's `index_info` with the indexes reported by the
/// bs workers of its domain.
///
/// Runs only when the searcher has a final-target, is heartbeating with
/// a searcher plan, and every bs worker that is not stopped reports
/// `finished`. The aggregated set is adopted when its size differs from
/// the current one.
pub struct AutoIndexLoadHandler {
    deps: Deps,
}

impl AutoIndexLoadHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Indexes reported by the domain's builders, or `None` while any
    /// builder has not finished. Stopped builders are left out.
    fn finished_indexes(&self, worker: &WorkerKey) -> ReconcileResult<Option<BTreeMap<String, IndexInfo>>> {
        let builders = self.deps.store.list_workers(&worker.domain, Role::Bs)?;
        if builders.is_empty() {
            return Ok(None);
        }

        let mut indexes = BTreeMap::new();
        let mut counted = 0;
        for name in builders {
            let builder = worker.sibling(Role::Bs, &name);
            let stopped = self
                .deps
                .store
                .read(&builder, TargetKind::FinalTarget)
                .is_some_and(|ft| ft.status == WorkerStatus::Stopped);
            if stopped {
                debug!(%worker, builder = %name, "builder stopped, not waiting for it");
                continue;
            }
            counted += 1;
            let Some(heartbeat) = self.deps.store.read(&builder, TargetKind::Heartbeat) else {
                debug!(%worker, builder = %name, "builder has no heartbeat yet");
                return Ok(None);
            };
            if heartbeat.reported_status() != WorkerStatus::Finished {
                debug!(%worker, builder = %name, "builder still running");
                return Ok(None);
            }
            if let Some(biz) = heartbeat.plan.index_config {
                indexes.extend(biz.index_info);
            }
        }
        if counted == 0 {
            return Ok(None);
        }
        Ok(Some(indexes))
    }
}

/// Heartbeating with a searcher plan and not stopped.
fn has_live_plan(heartbeat: Option<&Target>) -> bool {
    heartbeat.is_some_and(|hb| {
        hb.plan.searcher_config.is_some() && hb.reported_status() != WorkerStatus::Stopped
    })
}

impl Handler for AutoIndexLoadHandler {
    fn name(&self) -> &'static str {
        "auto-index-load"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        None
    }

    fn handle(
        &self,
        worker: &WorkerKey,
        _user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool> {
        if worker.role != Role::Searcher {
            return Ok(false);
        }
        let Some(previous) = final_target else {
            return Ok(false);
        };
        if previous.status == WorkerStatus::Stopped {
            return Ok(false);
        }
        let heartbeat = self.deps.store.read(worker, TargetKind::Heartbeat);
        if !has_live_plan(heartbeat.as_ref()) {
            return Ok(false);
        }
        let Some(indexes) = self.finished_indexes(worker)? else {
            return Ok(false);
        };

        let current = previous
            .plan
            .searcher_config
            .as_ref()
            .map_or(0, |biz| biz.index_info.len());
        if indexes.len() == current {
            return Ok(false);
        }

        let mut updated = previous.clone();
        updated.plan.business_mut(Role::Searcher).index_info = indexes;
        self.deps
            .distributor
            .distribute(worker, &updated, Some(previous.revision), None)?;
        info!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            from = current,
            "searcher index set loaded"
        );
        Ok(true)
    }
}
