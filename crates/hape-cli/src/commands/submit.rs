//! Commands that write a user-target for the daemon to pick up.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Args;
use hape_core::{Role, TargetKind, UserCmd, WorkerKey};
use hape_target::{IndexInfo, Plan, Target, TargetStore};
use serde_json::{Map, Value};

/// Placement flags of `hape start`.
#[derive(Args, Debug, Default)]
pub struct PlanArgs {
    /// JSON file holding a full plan; flags below override its fields
    #[arg(long)]
    pub plan: Option<PathBuf>,
    /// Container name
    #[arg(long)]
    pub container: Option<String>,
    /// Host address
    #[arg(long)]
    pub address: Option<String>,
    /// Container image
    #[arg(long)]
    pub image: Option<String>,
}

impl PlanArgs {
    pub fn to_plan(&self) -> anyhow::Result<Plan> {
        let mut plan = match &self.plan {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing plan {}", path.display()))?
            }
            None => Plan::default(),
        };
        let info = &mut plan.processor_info;
        if let Some(container) = &self.container {
            info.container_name = container.clone();
        }
        if let Some(address) = &self.address {
            info.address = address.clone();
        }
        if let Some(image) = &self.image {
            info.image = image.clone();
        }
        Ok(plan)
    }
}

fn split_pair<'a>(pair: &'a str, what: &str) -> anyhow::Result<(&'a str, &'a str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("invalid {what} {pair:?}, expected KEY=VALUE"),
    }
}

fn submit(store: &dyn TargetStore, worker: &WorkerKey, target: Target) -> anyhow::Result<()> {
    let revision = store.write(worker, TargetKind::UserTarget, &target)?;
    if let Some(cmd) = target.user_cmd {
        println!("✓ {cmd} submitted for {worker} (revision {revision})");
    }
    Ok(())
}

pub fn start_target(plan: &PlanArgs, host_init: &[String]) -> anyhow::Result<Target> {
    let plan = plan.to_plan()?;
    if !plan.processor_info.is_placed() {
        bail!("start needs a placement: pass --container or --address, or a --plan file");
    }
    let mut init = Map::new();
    for pair in host_init {
        let (key, value) = split_pair(pair, "host-init")?;
        init.insert(key.to_string(), Value::String(value.to_string()));
    }
    let mut target = Target::user(UserCmd::StartWorker, plan);
    target.host_init = init;
    Ok(target)
}

pub fn upc_target(worker: &WorkerKey, config_path: &str) -> Target {
    let mut plan = Plan::default();
    plan.business_mut(worker.role).config_path = Some(config_path.to_string());
    Target::user(UserCmd::UpdateConfig, plan)
}

pub fn dp_target(packages: &[String]) -> Target {
    let mut plan = Plan::default();
    plan.processor_info.packages = packages.to_vec();
    Target::user(UserCmd::DeployPackage, plan)
}

pub fn upf_target(worker: &WorkerKey, indexes: &[String]) -> anyhow::Result<Target> {
    if worker.role != Role::Searcher {
        bail!("upf applies to searchers, {worker} is a {}", worker.role);
    }
    let mut plan = Plan::default();
    let index_info = &mut plan.business_mut(Role::Searcher).index_info;
    for pair in indexes {
        let (name, path) = split_pair(pair, "index")?;
        index_info.insert(
            name.to_string(),
            IndexInfo {
                index_path: path.to_string(),
                partition_count: 0,
            },
        );
    }
    Ok(Target::user(UserCmd::UpdateFullIndex, plan))
}

pub fn start(
    store: &dyn TargetStore,
    worker: &WorkerKey,
    plan: &PlanArgs,
    host_init: &[String],
) -> anyhow::Result<()> {
    submit(store, worker, start_target(plan, host_init)?)
}

pub fn stop(store: &dyn TargetStore, worker: &WorkerKey) -> anyhow::Result<()> {
    submit(store, worker, Target::user(UserCmd::StopWorker, Plan::default()))
}

pub fn remove(store: &dyn TargetStore, worker: &WorkerKey) -> anyhow::Result<()> {
    submit(store, worker, Target::user(UserCmd::RemoveWorker, Plan::default()))
}

pub fn upc(store: &dyn TargetStore, worker: &WorkerKey, config_path: &str) -> anyhow::Result<()> {
    submit(store, worker, upc_target(worker, config_path))
}

pub fn dp(store: &dyn TargetStore, worker: &WorkerKey, packages: &[String]) -> anyhow::Result<()> {
    submit(store, worker, dp_target(packages))
}

pub fn upf(store: &dyn TargetStore, worker: &WorkerKey, indexes: &[String]) -> anyhow::Result<()> {
    submit(store, worker, upf_target(worker, indexes)?)
}
