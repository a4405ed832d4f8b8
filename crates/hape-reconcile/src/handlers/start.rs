//! `start-worker`: adopt the user-target and ask the runtime to start the worker.

use hape_core::{UserCmd, WorkerKey, WorkerStatus};
use hape_target::Target;
use tracing::info;

use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

pub struct StartHandler {
    deps: Deps,
}

impl StartHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl Handler for StartHandler {
    fn name(&self) -> &'static str {
        "start"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        Some(UserCmd::StartWorker)
    }

    fn handle(
        &self,
        worker: &WorkerKey,
        user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool> {
        let Some(user) = user_target else {
            return Ok(false);
        };

        let mut adopted = user.to_final();
        adopted.status = WorkerStatus::Unset;

        self.deps
            .runtime
            .start_worker(worker, &adopted.host_init, &adopted.plan.processor_info)?;
        self.deps.distributor.distribute(
            worker,
            &adopted,
            final_target.map(|f| f.revision),
            Some(user),
        )?;

        info!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            container = %adopted.plan.processor_info.container_name,
            "worker start requested"
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

    #[test]
    fn adopts_user_target_and_consumes_it() {
        let fx = fixture();
        let worker = searcher("searcher-0");
        let user = fx.user(&worker, UserCmd::StartWorker, placed("c0"));

        let handler = StartHandler::new(fx.deps.clone());
        assert!(handler.handle(&worker, Some(&user), None).unwrap());

        assert!(fx.read(&worker, TargetKind::UserTarget).is_none());
        let final_target = fx.read(&worker, TargetKind::FinalTarget).unwrap();
        assert_eq!(final_target.kind, TargetKind::FinalTarget);
        assert_eq!(final_target.status, WorkerStatus::Unset);
        assert_eq!(final_target.plan, user.plan);

        let starts = fx.runtime.calls_of(RuntimeOp::Start);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].processor.container_name, "c0");
        assert_eq!(fx.runtime.count(RuntimeOp::Deliver), 1);
    }

    #[test]
    fn runtime_failure_keeps_the_user_target() {
        let fx = fixture();
        let worker = searcher("searcher-0");
        let user = fx.user(&worker, UserCmd::StartWorker, placed("c0"));
        fx.runtime.fail_on(RuntimeOp::Start);

        let handler = StartHandler::new(fx.deps.clone());
        assert!(handler.handle(&worker, Some(&user), None).is_err());
        assert!(fx.read(&worker, TargetKind::UserTarget).is_some());
        assert!(fx.read(&worker, TargetKind::FinalTarget).is_none());
    }
}
