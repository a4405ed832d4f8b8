//! `stop-worker`: stop the container and keep a stopped final-target.

use hape_core::{UserCmd, WorkerKey, WorkerStatus};
use hape_target::{RetireMode, Target};
use tracing::info;

use super::placement_basis;
use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

pub struct StopHandler {
    deps: Deps,
}

impl StopHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl Handler for StopHandler {
    fn name(&self) -> &'static str {
        "stop"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        Some(UserCmd::StopWorker)
    }

    fn handle(
        &self,
        worker: &WorkerKey,
        user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool> {
        let Some(basis) = placement_basis(&self.deps, worker, user_target, final_target) else {
            return Ok(false);
        };

        let mut stopped = basis.to_final();
        stopped.user_cmd = Some(UserCmd::StopWorker);
        stopped.status = WorkerStatus::Stopped;
        stopped.plan.status = None;
        stopped.timestamp = None;

        self.deps
            .runtime
            .stop_worker(worker, &stopped.plan.processor_info)?;
        self.deps
            .distributor
            .retire(worker, RetireMode::Stop, &stopped, user_target)?;

        info!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            "worker stopped"
        );
        Ok(true)
    }
}
