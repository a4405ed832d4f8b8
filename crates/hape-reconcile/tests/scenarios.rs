//! End-to-end reconciliation scenarios against the filesystem store.

use std::sync::Arc;

use hape_core::{HandlerKind, HapeConfig, Role, TargetKind, UserCmd, WorkerKey, WorkerStatus};
use hape_reconcile::{EventProcessor, Outcome};
use hape_runtime::{RecordingRuntime, RuntimeOp};
use hape_target::{
    FsTargetStore, IndexInfo, Plan, ProcessorInfo, SubscribeInfo, Target, TargetStore,
};

struct Cluster {
    _dir: tempfile::TempDir,
    store: Arc<FsTargetStore>,
    runtime: Arc<RecordingRuntime>,
    processor: EventProcessor,
}

fn cluster() -> Cluster {
    cluster_with(HapeConfig::default())
}

fn cluster_with(config: HapeConfig) -> Cluster {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsTargetStore::open(dir.path()).unwrap());
    let runtime = Arc::new(RecordingRuntime::new());
    let processor = EventProcessor::from_config(&config, store.clone(), runtime.clone());
    Cluster {
        _dir: dir,
        store,
        runtime,
        processor,
    }
}

fn key(role: Role, name: &str) -> WorkerKey {
    WorkerKey::new("d1", role, name)
}

fn placement(container: &str) -> Plan {
    Plan {
        processor_info: ProcessorInfo {
            address: "10.0.0.1".to_string(),
            container_name: container.to_string(),
            image: "havenask:latest".to_string(),
            ..ProcessorInfo::default()
        },
        ..Plan::default()
    }
}

impl Cluster {
    fn submit(&self, worker: &WorkerKey, cmd: UserCmd, plan: Plan) {
        self.store
            .write(worker, TargetKind::UserTarget, &Target::user(cmd, plan))
            .unwrap();
    }

    fn heartbeat(&self, worker: &WorkerKey, status: WorkerStatus, plan: Plan) {
        let mut heartbeat = Target::new(TargetKind::Heartbeat);
        heartbeat.status = status;
        heartbeat.timestamp = Some(hape_core::epoch_secs());
        heartbeat.plan = plan;
        self.store.write(worker, TargetKind::Heartbeat, &heartbeat).unwrap();
    }

    fn final_target(&self, worker: &WorkerKey) -> Option<Target> {
        self.store.read(worker, TargetKind::FinalTarget)
    }

    /// Start a worker and let one tick adopt it.
    fn started(&self, worker: &WorkerKey, plan: Plan) -> Target {
        self.submit(worker, UserCmd::StartWorker, plan);
        let report = self.processor.tick(worker);
        assert_eq!(report.applied(), vec!["start"]);
        self.final_target(worker).unwrap()
    }
}

#[test]
fn start_then_stop() {
    let c = cluster();
    let worker = key(Role::Searcher, "searcher-0");

    let started = c.started(&worker, placement("c0"));
    assert_eq!(started.user_cmd, Some(UserCmd::StartWorker));
    assert!(c.store.read(&worker, TargetKind::UserTarget).is_none());

    c.heartbeat(&worker, WorkerStatus::Running, placement("c0"));
    c.submit(&worker, UserCmd::StopWorker, Plan::default());
    let report = c.processor.tick(&worker);
    assert_eq!(report.applied(), vec!["stop"]);

    let stopped = c.final_target(&worker).unwrap();
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert_eq!(stopped.user_cmd, Some(UserCmd::StopWorker));
    assert!(c.store.worker_dir(&worker).is_dir());
    assert!(c.store.read(&worker, TargetKind::Heartbeat).is_none());

    let ops: Vec<_> = c
        .runtime
        .calls()
        .into_iter()
        .filter(|call| call.op != RuntimeOp::Deliver)
        .map(|call| call.op)
        .collect();
    assert_eq!(ops, vec![RuntimeOp::Start, RuntimeOp::Stop]);
}

#[test]
fn remove_deletes_the_worker_directory() {
    let c = cluster();
    let worker = key(Role::Qrs, "qrs-0");
    c.started(&worker, placement("q0"));

    c.submit(&worker, UserCmd::RemoveWorker, Plan::default());
    let report = c.processor.tick(&worker);
    assert_eq!(report.applied(), vec!["remove"]);

    assert!(!c.store.worker_dir(&worker).exists());
    for kind in TargetKind::ALL {
        assert!(c.store.read(&worker, kind).is_none());
    }
    assert!(c.processor.workers().unwrap().is_empty());
}

#[test]
fn command_handlers_are_idempotent() {
    let c = cluster();
    let commands = [
        UserCmd::StartWorker,
        UserCmd::StopWorker,
        UserCmd::RemoveWorker,
        UserCmd::UpdateConfig,
        UserCmd::DeployPackage,
        UserCmd::UpdateFullIndex,
    ];
    for (i, cmd) in commands.into_iter().enumerate() {
        let worker = key(Role::Searcher, &format!("searcher-{i}"));
        let mut plan = placement("c");
        let biz = plan.business_mut(Role::Searcher);
        biz.config_path = Some("/conf/v1".to_string());
        biz.index_info.insert(
            "in0".to_string(),
            IndexInfo {
                index_path: "/idx/in0/1".to_string(),
                partition_count: 1,
            },
        );
        if cmd != UserCmd::StartWorker {
            c.started(&worker, plan.clone());
        }

        let mut request = plan;
        let biz = request.business_mut(Role::Searcher);
        biz.config_path = Some("/conf/v2".to_string());
        if let Some(info) = biz.index_info.get_mut("in0") {
            info.index_path = "/idx/in0/2".to_string();
        }
        request.processor_info.packages = vec!["pkg-2".to_string()];
        c.submit(&worker, cmd, request);

        let first = c.processor.tick(&worker);
        assert_eq!(first.applied().len(), 1, "{cmd}: {:?}", first.outcomes);
        let calls = c.runtime.calls().len();
        let converged = c.final_target(&worker).map(|t| t.plan);

        let second = c.processor.tick(&worker);
        assert!(second.applied().is_empty(), "{cmd}: {:?}", second.outcomes);
        assert_eq!(c.runtime.calls().len(), calls, "{cmd}");
        assert_eq!(c.final_target(&worker).map(|t| t.plan), converged, "{cmd}");
        assert!(c.store.read(&worker, TargetKind::UserTarget).is_none(), "{cmd}");
    }
}

#[test]
fn exactly_one_command_handler_matches() {
    let c = cluster();
    for (i, cmd) in UserCmd::ALL.iter().enumerate() {
        let worker = key(Role::Searcher, &format!("searcher-{i}"));
        if *cmd != UserCmd::StartWorker {
            c.started(&worker, placement("c"));
        }
        let mut plan = placement("c");
        plan.business_mut(Role::Searcher).config_path = Some("/conf/v2".to_string());
        c.submit(&worker, *cmd, plan);

        let report = c.processor.tick(&worker);
        let command_handlers = ["start", "stop", "remove", "upc", "dp", "upf"];
        let applied: Vec<_> = report
            .applied()
            .into_iter()
            .filter(|name| command_handlers.contains(name))
            .collect();
        assert_eq!(applied.len(), 1, "{cmd}: {:?}", report.outcomes);
    }
}

#[test]
fn update_config_preserves_everything_else() {
    let c = cluster();
    let worker = key(Role::Searcher, "searcher-0");
    let mut plan = placement("c0");
    let biz = plan.business_mut(Role::Searcher);
    biz.config_path = Some("/conf/v1".to_string());
    biz.index_info.insert(
        "in0".to_string(),
        IndexInfo {
            index_path: "/idx/in0/1".to_string(),
            partition_count: 4,
        },
    );
    plan.processor_info.packages = vec!["pkg-1".to_string()];
    let before = c.started(&worker, plan);

    let mut upc = Plan::default();
    upc.business_mut(Role::Searcher).config_path = Some("/conf/v2".to_string());
    c.submit(&worker, UserCmd::UpdateConfig, upc);
    let report = c.processor.tick(&worker);
    assert_eq!(report.applied(), vec!["upc"]);

    let after = c.final_target(&worker).unwrap();
    let mut expected = before.plan.clone();
    expected.business_mut(Role::Searcher).config_path = Some("/conf/v2".to_string());
    assert_eq!(after.plan, expected);
    assert_eq!(after.host_init, before.host_init);
    assert!(after.revision > before.revision);
}

#[test]
fn auto_index_load_converges() {
    let c = cluster();
    let searcher = key(Role::Searcher, "searcher-0");
    let mut serving = placement("s0");
    serving.business_mut(Role::Searcher);
    c.started(&searcher, serving.clone());
    c.heartbeat(&searcher, WorkerStatus::Running, serving);

    for (name, index) in [("bs-0", "in0"), ("bs-1", "in1")] {
        let builder = key(Role::Bs, name);
        let mut built = Plan::default();
        built.business_mut(Role::Bs).index_info.insert(
            index.to_string(),
            IndexInfo {
                index_path: format!("/idx/{index}/1"),
                partition_count: 1,
            },
        );
        c.heartbeat(&builder, WorkerStatus::Finished, built);
    }

    let report = c.processor.tick(&searcher);
    assert_eq!(report.applied(), vec!["auto-index-load"]);
    let loaded = c.final_target(&searcher).unwrap();
    assert_eq!(loaded.plan.searcher_config.unwrap().index_info.len(), 2);

    let report = c.processor.tick(&searcher);
    assert!(report.applied().is_empty());
}

#[test]
fn qrs_subscription_is_order_insensitive() {
    let c = cluster();
    let qrs = key(Role::Qrs, "qrs-0");
    c.started(&qrs, placement("q0"));

    for (name, port) in [("searcher-1", 39001), ("searcher-0", 39000)] {
        let searcher = key(Role::Searcher, name);
        c.started(&searcher, placement(name));
        let mut plan = placement(name);
        plan.business_mut(Role::Searcher).subscribe_infos = vec![SubscribeInfo {
            worker: name.to_string(),
            address: "10.0.0.1".to_string(),
            port,
            zone_name: "general".to_string(),
            partition: 0,
        }];
        c.heartbeat(&searcher, WorkerStatus::Running, plan);
    }

    let report = c.processor.tick(&qrs);
    assert_eq!(report.applied(), vec!["qrs-subscribe"]);

    // Shuffle the stored list: still converged.
    let mut shuffled = c.final_target(&qrs).unwrap();
    shuffled
        .plan
        .qrs_config
        .as_mut()
        .unwrap()
        .subscribe_infos
        .reverse();
    c.store.write(&qrs, TargetKind::FinalTarget, &shuffled).unwrap();

    let report = c.processor.tick(&qrs);
    assert!(report.applied().is_empty());
}

#[test]
fn compare_and_swap_allows_sequential_updates() {
    let mut config = HapeConfig::default();
    config.store.compare_and_swap = true;
    config.reconcile.handlers = vec![HandlerKind::Start, HandlerKind::Dp];
    let c = cluster_with(config);
    let worker = key(Role::Bs, "bs-0");
    c.started(&worker, placement("b0"));

    let mut plan = Plan::default();
    plan.processor_info.packages = vec!["pkg-2".to_string()];
    c.submit(&worker, UserCmd::DeployPackage, plan);
    let report = c.processor.tick(&worker);
    assert_eq!(report.outcome("dp"), Some(&Outcome::Applied));
    assert_eq!(
        c.final_target(&worker).unwrap().plan.processor_info.packages,
        vec!["pkg-2"]
    );
}

#[test]
fn tick_all_walks_every_worker() {
    let c = cluster();
    let workers = [key(Role::Bs, "bs-0"), key(Role::Searcher, "searcher-0"), key(Role::Qrs, "qrs-0")];
    for worker in &workers {
        c.submit(worker, UserCmd::StartWorker, placement(&worker.worker));
    }

    let reports = c.processor.tick_all().unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.applied() == vec!["start"]));
    assert_eq!(c.runtime.count(RuntimeOp::Start), 3);
}
