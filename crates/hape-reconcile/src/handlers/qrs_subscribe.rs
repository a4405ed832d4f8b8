//! Keep a qrs subscribed to every running searcher of its domain.

use hape_core::{Role, TargetKind, UserCmd, WorkerKey, WorkerStatus};
use hape_target::{SubscribeInfo, Target};
use tracing::{debug, info};

use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

/// Rebuilds `qrs_config.subscribe_infos` from searcher heartbeats.
///
/// Every searcher with a final-target that is not stopped must be
/// running before the list is rebuilt; a partial list is never
/// published. Order does not matter when comparing lists. When every
/// searcher is stopped or removed the qrs is left with an empty list.
pub struct QrsSubscribeHandler {
    deps: Deps,
}

impl QrsSubscribeHandler {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Sorted, deduplicated subscriptions of all required searchers, or
    /// `None` while any of them is not running. Empty once no searcher is
    /// required.
    fn subscriptions(&self, worker: &WorkerKey) -> ReconcileResult<Option<Vec<SubscribeInfo>>> {
        let mut infos = Vec::new();
        for name in self.deps.store.list_workers(&worker.domain, Role::Searcher)? {
            let searcher = worker.sibling(Role::Searcher, &name);
            let wanted = self
                .deps
                .store
                .read(&searcher, TargetKind::FinalTarget)
                .is_some_and(|f| f.status != WorkerStatus::Stopped);
            if !wanted {
                continue;
            }

            let heartbeat = self.deps.store.read(&searcher, TargetKind::Heartbeat);
            let Some(heartbeat) = heartbeat.filter(|hb| hb.reported_status() == WorkerStatus::Running)
            else {
                debug!(%worker, searcher = %name, "searcher not running yet");
                return Ok(None);
            };
            if let Some(biz) = heartbeat.plan.searcher_config {
                infos.extend(biz.subscribe_infos);
            }
        }
        infos.sort();
        infos.dedup();
        Ok(Some(infos))
    }
}

impl Handler for QrsSubscribeHandler {
    fn name(&self) -> &'static str {
        "qrs-subscribe"
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
        if worker.role != Role::Qrs {
            return Ok(false);
        }
        let Some(previous) = final_target.filter(|f| f.status != WorkerStatus::Stopped) else {
            return Ok(false);
        };
        let Some(wanted) = self.subscriptions(worker)? else {
            return Ok(false);
        };

        let mut current = previous
            .plan
            .qrs_config
            .as_ref()
            .map(|biz| biz.subscribe_infos.clone())
            .unwrap_or_default();
        current.sort();
        if current == wanted {
            return Ok(false);
        }

        let mut updated = previous.clone();
        let count = wanted.len();
        updated.plan.business_mut(Role::Qrs).subscribe_infos = wanted;
        self.deps
            .distributor
            .distribute(worker, &updated, Some(previous.revision), None)?;
        info!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            searchers = count,
            "qrs subscriptions updated"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil::*;
    use hape_target::{BizConfig, Plan};

    fn qrs() -> WorkerKey {
        WorkerKey::new("d1", Role::Qrs, "qrs-0")
    }

    fn sub(worker: &str, port: u16) -> SubscribeInfo {
        SubscribeInfo {
            worker: worker.to_string(),
            address: "10.0.0.2".to_string(),
            port,
            zone_name: "general".to_string(),
            partition: 0,
        }
    }

    fn serving(infos: Vec<SubscribeInfo>) -> Plan {
        let biz = BizConfig {
            subscribe_infos: infos,
            ..BizConfig::default()
        };
        with_biz(Plan::default(), Role::Searcher, biz)
    }

    fn add_searcher(fx: &Fixture, name: &str, status: WorkerStatus, port: u16) {
        let worker = searcher(name);
        fx.final_target(&worker, placed(name));
        fx.heartbeat(&worker, status, serving(vec![sub(name, port)]));
    }

    #[test]
    fn subscribes_to_running_searchers() {
        let fx = fixture();
        add_searcher(&fx, "searcher-1", WorkerStatus::Running, 39001);
        add_searcher(&fx, "searcher-0", WorkerStatus::Running, 39000);
        let previous = fx.final_target(&qrs(), placed("q0"));

        let handler = QrsSubscribeHandler::new(fx.deps.clone());
        assert!(handler.handle(&qrs(), None, Some(&previous)).unwrap());

        let updated = fx.read(&qrs(), TargetKind::FinalTarget).unwrap();
        let infos = &updated.plan.qrs_config.as_ref().unwrap().subscribe_infos;
        assert_eq!(infos, &vec![sub("searcher-0", 39000), sub("searcher-1", 39001)]);

        assert!(!handler.handle(&qrs(), None, Some(&updated)).unwrap());
    }

    #[test]
    fn order_of_current_list_does_not_matter() {
        let fx = fixture();
        add_searcher(&fx, "searcher-0", WorkerStatus::Running, 39000);
        add_searcher(&fx, "searcher-1", WorkerStatus::Running, 39001);
        let biz = BizConfig {
            subscribe_infos: vec![sub("searcher-1", 39001), sub("searcher-0", 39000)],
            ..BizConfig::default()
        };
        let previous = fx.final_target(&qrs(), with_biz(placed("q0"), Role::Qrs, biz));

        let handler = QrsSubscribeHandler::new(fx.deps.clone());
        assert!(!handler.handle(&qrs(), None, Some(&previous)).unwrap());
    }

    #[test]
    fn waits_for_every_required_searcher() {
        let fx = fixture();
        add_searcher(&fx, "searcher-0", WorkerStatus::Running, 39000);
        add_searcher(&fx, "searcher-1", WorkerStatus::Unset, 39001);
        let previous = fx.final_target(&qrs(), placed("q0"));

        let handler = QrsSubscribeHandler::new(fx.deps.clone());
        assert!(!handler.handle(&qrs(), None, Some(&previous)).unwrap());
    }

    #[test]
    fn stopped_searchers_are_not_required() {
        let fx = fixture();
        add_searcher(&fx, "searcher-0", WorkerStatus::Running, 39000);
        let stopped = searcher("searcher-1");
        let mut final_target = Target::new(TargetKind::FinalTarget);
        final_target.status = WorkerStatus::Stopped;
        fx.put(&stopped, TargetKind::FinalTarget, &final_target);
        let previous = fx.final_target(&qrs(), placed("q0"));

        let handler = QrsSubscribeHandler::new(fx.deps.clone());
        assert!(handler.handle(&qrs(), None, Some(&previous)).unwrap());
        let updated = fx.read(&qrs(), TargetKind::FinalTarget).unwrap();
        assert_eq!(
            updated.plan.qrs_config.unwrap().subscribe_infos,
            vec![sub("searcher-0", 39000)]
        );
    }

    #[test]
    fn unsubscribes_once_no_searcher_is_required() {
        let fx = fixture();
        let gone = searcher("searcher-0");
        let mut final_target = Target::new(TargetKind::FinalTarget);
        final_target.status = WorkerStatus::Stopped;
        fx.put(&gone, TargetKind::FinalTarget, &final_target);
        let biz = BizConfig {
            subscribe_infos: vec![sub("searcher-0", 39000)],
            ..BizConfig::default()
        };
        let previous = fx.final_target(&qrs(), with_biz(placed("q0"), Role::Qrs, biz));

        let handler = QrsSubscribeHandler::new(fx.deps.clone());
        assert!(handler.handle(&qrs(), None, Some(&previous)).unwrap());
        let updated = fx.read(&qrs(), TargetKind::FinalTarget).unwrap();
        assert!(updated.plan.qrs_config.unwrap().subscribe_infos.is_empty());
    }

    #[test]
    fn no_searchers_and_no_subscriptions_is_converged() {
        let fx = fixture();
        let previous = fx.final_target(&qrs(), placed("q0"));
        let handler = QrsSubscribeHandler::new(fx.deps.clone());
        assert!(!handler.handle(&qrs(), None, Some(&previous)).unwrap());
    }
}
