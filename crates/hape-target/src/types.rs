//! Target documents.
//!
//! A worker has up to three documents: the operator's pending
//! user-target, the reconciler's final-target and the worker-written
//! heartbeat. All three share the [`Target`] shape. Fields the
//! reconciler does not model are kept in `extra` maps so a rewrite
//! never drops them.

use std::collections::BTreeMap;

use hape_core::{Role, TargetKind, UserCmd, WorkerStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One target document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_cmd: Option<UserCmd>,
    /// Worker-reported status (heartbeats) or `stopped` on a stopped final-target.
    #[serde(default)]
    pub status: WorkerStatus,
    /// Worker-reported heartbeat time, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub plan: Plan,
    /// Host-level parameters needed to start the worker.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub host_init: Map<String, Value>,
    /// Last-written time per kind, unix milliseconds. Stamped by the store.
    #[serde(default)]
    pub timestamps: Timestamps,
    /// Bumped by the store on every write of the same document.
    #[serde(default)]
    pub revision: u64,
    /// On a final-target: stamp of the user-target it consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_user_target: Option<i64>,
}

/// Desired placement plus role-specific business configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub processor_info: ProcessorInfo,
    /// Plan-level status, reported by builders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_config: Option<BizConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searcher_config: Option<BizConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qrs_config: Option<BizConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Container/process placement of a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProcessorInfo {
    /// Whether this names anything the runtime could act on.
    pub fn is_placed(&self) -> bool {
        !self.container_name.is_empty() || !self.address.is_empty()
    }
}

/// Role-specific business configuration (`index_config`, `searcher_config`, `qrs_config`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BizConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub index_info: BTreeMap<String, IndexInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe_infos: Vec<SubscribeInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub index_path: String,
    #[serde(default)]
    pub partition_count: u32,
}

/// Where a qrs reaches one searcher.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscribeInfo {
    pub worker: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub zone_name: String,
    #[serde(default)]
    pub partition: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_target: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_target: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<i64>,
}

impl Timestamps {
    pub fn get(&self, kind: TargetKind) -> Option<i64> {
        match kind {
            TargetKind::UserTarget => self.user_target,
            TargetKind::FinalTarget => self.final_target,
            TargetKind::Heartbeat => self.heartbeat,
        }
    }

    pub fn set(&mut self, kind: TargetKind, millis: i64) {
        let slot = match kind {
            TargetKind::UserTarget => &mut self.user_target,
            TargetKind::FinalTarget => &mut self.final_target,
            TargetKind::Heartbeat => &mut self.heartbeat,
        };
        *slot = Some(millis);
    }
}

impl Target {
    pub fn new(kind: TargetKind) -> Self {
        Self {
            kind,
            user_cmd: None,
            status: WorkerStatus::Unset,
            timestamp: None,
            plan: Plan::default(),
            host_init: Map::new(),
            timestamps: Timestamps::default(),
            revision: 0,
            consumed_user_target: None,
        }
    }

    /// An operator user-target for `cmd`.
    pub fn user(cmd: UserCmd, plan: Plan) -> Self {
        Self {
            user_cmd: Some(cmd),
            plan,
            ..Self::new(TargetKind::UserTarget)
        }
    }

    /// Stamp identifying this document as a user-target.
    pub fn user_stamp(&self) -> Option<i64> {
        self.timestamps.user_target
    }

    /// `plan.status` when the worker reports one, else the top-level status.
    pub fn reported_status(&self) -> WorkerStatus {
        self.plan.status.unwrap_or(self.status)
    }

    /// Re-tag a copy of this document as a final-target.
    pub fn to_final(&self) -> Target {
        Target {
            kind: TargetKind::FinalTarget,
            ..self.clone()
        }
    }
}

impl Plan {
    pub fn business(&self, role: Role) -> Option<&BizConfig> {
        match role {
            Role::Bs => self.index_config.as_ref(),
            Role::Searcher => self.searcher_config.as_ref(),
            Role::Qrs => self.qrs_config.as_ref(),
        }
    }

    /// The role's business section, created empty when absent.
    pub fn business_mut(&mut self, role: Role) -> &mut BizConfig {
        let slot = match role {
            Role::Bs => &mut self.index_config,
            Role::Searcher => &mut self.searcher_config,
            Role::Qrs => &mut self.qrs_config,
        };
        slot.get_or_insert_with(BizConfig::default)
    }
}
