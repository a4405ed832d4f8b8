//! `upc`: point the worker at a new business configuration.

use hape_core::{UserCmd, WorkerKey};
use hape_target::Target;
use tracing::debug;

use super::apply_update;
use crate::error::{ReconcileError, ReconcileResult};
use crate::handler::{Deps, Handler};

/// Copies `config_path` of the role's business section into the
/// final-target. Every other field of the final-target is preserved.
pub struct UpdateConfigHandler {
    deps: Deps,
}

impl UpdateConfigHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl Handler for UpdateConfigHandler {
    fn name(&self) -> &'static str {
        "upc"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        Some(UserCmd::UpdateConfig)
    }

    fn handle(
        &self,
        worker: &WorkerKey,
        user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool> {
        let (Some(user), Some(previous)) = (user_target, final_target) else {
            debug!(%worker, "upc waits for a final-target");
            return Ok(false);
        };

        let config_path = user
            .plan
            .business(worker.role)
            .and_then(|biz| biz.config_path.clone())
            .ok_or_else(|| {
                ReconcileError::InvalidPlan(format!(
                    "upc for {worker} has no {}.config_path",
                    worker.role.business_key()
                ))
            })?;

        let mut updated = previous.clone();
        updated.plan.business_mut(worker.role).config_path = Some(config_path);
        apply_update(&self.deps, self.name(), worker, user, previous, updated)
    }
}
