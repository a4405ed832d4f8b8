//! `remove-worker`: remove the container and every document of the worker.

use hape_core::{UserCmd, WorkerKey, WorkerStatus};
use hape_target::{RetireMode, Target};
use tracing::info;

use super::placement_basis;
use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

pub struct RemoveHandler {
    deps: Deps,
}

impl RemoveHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl Handler for RemoveHandler {
    fn name(&self) -> &'static str {
        "remove"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        Some(UserCmd::RemoveWorker)
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

        let mut removed = basis.to_final();
        removed.user_cmd = Some(UserCmd::RemoveWorker);
        removed.status = WorkerStatus::Stopped;

        self.deps
            .runtime
            .remove_worker(worker, &removed.plan.processor_info)?;
        self.deps
            .distributor
            .retire(worker, RetireMode::Remove, &removed, user_target)?;

        info!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            "worker removed"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use hape_core::TargetKind;
    use hape_runtime::RuntimeOp;
    use hape_target::Plan;

    #[test]
    fn removes_every_document() {
        let fx = fixture();
        let worker = searcher("searcher-0");
        let final_target = fx.final_target(&worker, placed("c0"));
        fx.heartbeat(&worker, WorkerStatus::Running, placed("c0"));
        let user = fx.user(&worker, UserCmd::RemoveWorker, Plan::default());

        let handler = RemoveHandler::new(fx.deps.clone());
        assert!(handler.handle(&worker, Some(&user), Some(&final_target)).unwrap());

        for kind in TargetKind::ALL {
            assert!(fx.read(&worker, kind).is_none(), "{kind} should be gone");
        }
        assert_eq!(fx.runtime.count(RuntimeOp::Remove), 1);
    }

    #[test]
    fn runtime_failure_leaves_documents_in_place() {
        let fx = fixture();
        let worker = searcher("searcher-0");
        let final_target = fx.final_target(&worker, placed("c0"));
        let user = fx.user(&worker, UserCmd::RemoveWorker, Plan::default());
        fx.runtime.fail_on(RuntimeOp::Remove);

        let handler = RemoveHandler::new(fx.deps.clone());
        assert!(handler.handle(&worker, Some(&user), Some(&final_target)).is_err());
        assert!(fx.read(&worker, TargetKind::FinalTarget).is_some());
        assert!(fx.read(&worker, TargetKind::UserTarget).is_some());
    }
}
