//! `upf`: switch a searcher to freshly built full indexes.

use hape_core::{Role, UserCmd, WorkerKey};
use hape_target::Target;
use tracing::{debug, warn};

use super::apply_update;
use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

/// Merges `index_path` per index name into the searcher's final-target.
/// Index names the final-target does not know are ignored.
pub struct UpdateFullIndexHandler {
    deps: Deps,
}

impl UpdateFullIndexHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

impl Handler for UpdateFullIndexHandler {
    fn name(&self) -> &'static str {
        "upf"
    }

    fn watch_command(&self) -> Option<UserCmd> {
        Some(UserCmd::UpdateFullIndex)
    }

    fn handle(
        &self,
        worker: &WorkerKey,
        user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool> {
        if worker.role != Role::Searcher {
            debug!(%worker, "upf only applies to searchers");
            return Ok(false);
        }
        let (Some(user), Some(previous)) = (user_target, final_target) else {
            debug!(%worker, "upf waits for a final-target");
            return Ok(false);
        };

        let incoming = user
            .plan
            .searcher_config
            .as_ref()
            .map(|biz| biz.index_info.clone())
            .unwrap_or_default();

        let mut updated = previous.clone();
        let index_info = &mut updated.plan.business_mut(Role::Searcher).index_info;
        for (name, info) in incoming {
            match index_info.get_mut(&name) {
                Some(entry) => entry.index_path = info.index_path,
                None => warn!(%worker, index = %name, "upf names an unknown index, ignoring"),
            }
        }
        apply_update(&self.deps, self.name(), worker, user, previous, updated)
    }
}
