//! Built-in handlers.
//!
//! Command handlers react to one operator command and consume the
//! user-target that carried it:
//!
//! | handler | command |
//! |---------|---------|
//! | [`StartHandler`] | `start-worker` |
//! | [`StopHandler`] | `stop-worker` |
//! | [`RemoveHandler`] | `remove-worker` |
//! | [`UpdateConfigHandler`] | `upc` |
//! | [`DeployPackageHandler`] | `dp` |
//! | [`UpdateFullIndexHandler`] | `upf` |
//!
//! Background handlers ([`AutoIndexLoadHandler`], [`QrsSubscribeHandler`],
//! [`KeepWorkerHandler`]) derive a final-target from the heartbeats of
//! other workers and leave user-targets alone.

mod auto_index_load;
mod deploy_package;
mod keep_worker;
mod qrs_subscribe;
mod remove;
mod start;
mod stop;
mod update_config;
mod update_full_index;

pub use auto_index_load::AutoIndexLoadHandler;
pub use deploy_package::DeployPackageHandler;
pub use keep_worker::{KeepWorkerHandler, RestartBackoff};
pub use qrs_subscribe::QrsSubscribeHandler;
pub use remove::RemoveHandler;
pub use start::StartHandler;
pub use stop::StopHandler;
pub use update_config::UpdateConfigHandler;
pub use update_full_index::UpdateFullIndexHandler;

use hape_core::{HandlerKind, TargetKind, WorkerKey};
use hape_target::{ProcessorInfo, Target};
use tracing::{debug, info, warn};

use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

/// Instantiate the handler named in `[reconcile].handlers`.
pub fn build(kind: HandlerKind, deps: &Deps) -> Box<dyn Handler> {
    let deps = deps.clone();
    match kind {
        HandlerKind::Start => Box::new(StartHandler::new(deps)),
        HandlerKind::Stop => Box::new(StopHandler::new(deps)),
        HandlerKind::Remove => Box::new(RemoveHandler::new(deps)),
        HandlerKind::AutoIndexLoad => Box::new(AutoIndexLoadHandler::new(deps)),
        HandlerKind::QrsSubscribe => Box::new(QrsSubscribeHandler::new(deps)),
        HandlerKind::Upc => Box::new(UpdateConfigHandler::new(deps)),
        HandlerKind::Dp => Box::new(DeployPackageHandler::new(deps)),
        HandlerKind::Upf => Box::new(UpdateFullIndexHandler::new(deps)),
        HandlerKind::AutoKeepWorker => Box::new(KeepWorkerHandler::new(deps)),
    }
}

/// Build every handler of a chain, in order.
pub fn build_chain(kinds: &[HandlerKind], deps: &Deps) -> Vec<Box<dyn Handler>> {
    kinds.iter().map(|kind| build(*kind, deps)).collect()
}

/// Document describing where the worker runs, for stop and remove.
///
/// A pending user-target wins when it names a placement. Otherwise the
/// worker's own heartbeat, then the last final-target.
fn placement_basis(
    deps: &Deps,
    worker: &WorkerKey,
    user_target: Option<&Target>,
    final_target: Option<&Target>,
) -> Option<Target> {
    if let Some(user) = user_target.filter(|u| u.plan.processor_info.is_placed()) {
        return Some(user.clone());
    }
    deps.store
        .read(worker, TargetKind::Heartbeat)
        .or_else(|| final_target.cloned())
        .or_else(|| user_target.cloned())
}

/// Kill in-flight updaters so the next one picks up the new final-target.
/// Failure is logged only.
fn kill_updaters(deps: &Deps, worker: &WorkerKey, processor: &ProcessorInfo) {
    let command = format!("pkill -f {}", deps.settings.updater_pattern);
    match deps.runtime.worker_execute(worker, processor, &command) {
        Ok(_) => debug!(%worker, %command, "updaters killed"),
        Err(e) => warn!(%worker, error = %e, "failed to kill updaters, continuing"),
    }
}

/// Shared tail of the update commands (`upc`, `dp`, `upf`).
fn apply_update(
    deps: &Deps,
    handler: &'static str,
    worker: &WorkerKey,
    user_target: &Target,
    previous: &Target,
    updated: Target,
) -> ReconcileResult<bool> {
    kill_updaters(deps, worker, &updated.plan.processor_info);
    deps.distributor
        .distribute(worker, &updated, Some(previous.revision), Some(user_target))?;
    info!(
        domain = %worker.domain,
        role = %worker.role,
        worker = %worker.worker,
        handler,
        "final-target updated"
    );
    Ok(true)
}
