//! `dp`: roll new packages onto a running worker.

use hape_core::{UserCmd, WorkerKey};
use hape_target::Target;
use tracing::debug;

use super::apply_update;
use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

/// Copies `plan.processor_info.packages` into the final-target.
pub struct DeployPackageHandler {
    deps: Deps,
}

impl DeployPackageHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl Handler for DeployPackageHandler {
    fn name(&self) -> &'static str {
        "dp"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        Some(UserCmd::DeployPackage)
    }

    fn handle(
        &self,
        worker: &WorkerKey,
        user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool> {
        let (Some(user), Some(previous)) = (user_target, final_target) else {
            debug!(%worker, "dp waits for a final-target");
            return Ok(false);
        };

        let mut updated = previous.clone();
        updated.plan.processor_info.packages = user.plan.processor_info.packages.clone();
        apply_update(&self.deps, self.name(), worker, user, previous, updated)
    }
}
