//! Shared vocabulary used across hape crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string could not be parsed into one of the hape enums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: {value:?}")]
pub struct ParseError {
    pub what: &'static str,
    pub value: String,
}

impl ParseError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

// ── Role ───────────────────────────────────────────────────────────

/// Role of a worker inside a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Index builder.
    Bs,
    Searcher,
    /// Query routing service.
    Qrs,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Bs, Role::Searcher, Role::Qrs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Bs => "bs",
            Role::Searcher => "searcher",
            Role::Qrs => "qrs",
        }
    }

    /// Plan key of the business-config section this role owns.
    pub fn business_key(&self) -> &'static str {
        match self {
            Role::Bs => "index_config",
            Role::Searcher => "searcher_config",
            Role::Qrs => "qrs_config",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bs" => Ok(Role::Bs),
            "searcher" => Ok(Role::Searcher),
            "qrs" => Ok(Role::Qrs),
            _ => Err(ParseError::new("role", s)),
        }
    }
}

// ── Worker identity ────────────────────────────────────────────────

/// Identity of one worker's target stream: `(domain, role, worker)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerKey {
    pub domain: String,
    pub role: Role,
    pub worker: String,
}

impl WorkerKey {
    pub fn new(domain: &str, role: Role, worker: &str) -> Self {
        Self {
            domain: domain.to_string(),
            role,
            worker: worker.to_string(),
        }
    }

    /// Composite key `{domain}/{role}/{worker}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}", self.domain, self.role, self.worker)
    }

    /// A sibling worker in the same domain.
    pub fn sibling(&self, role: Role, worker: &str) -> Self {
        Self::new(&self.domain, role, worker)
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.role, self.worker)
    }
}

impl FromStr for WorkerKey {
    type Err = ParseError;

    /// Parses `{domain}/{role}/{worker}`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(domain), Some(role), Some(worker))
                if !domain.is_empty() && !worker.is_empty() && !worker.contains('/') =>
            {
                Ok(WorkerKey::new(domain, role.parse()?, worker))
            }
            _ => Err(ParseError::new("worker key", s)),
        }
    }
}

// ── Commands ───────────────────────────────────────────────────────

/// Operator command a user-target is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserCmd {
    #[serde(rename = "start-worker")]
    StartWorker,
    #[serde(rename = "stop-worker")]
    StopWorker,
    #[serde(rename = "remove-worker")]
    RemoveWorker,
    /// Deploy packages.
    #[serde(rename = "dp")]
    DeployPackage,
    /// Update config.
    #[serde(rename = "upc")]
    UpdateConfig,
    /// Update full index.
    #[serde(rename = "upf")]
    UpdateFullIndex,
}

impl UserCmd {
    pub const ALL: [UserCmd; 6] = [
        UserCmd::StartWorker,
        UserCmd::StopWorker,
        UserCmd::RemoveWorker,
        UserCmd::DeployPackage,
        UserCmd::UpdateConfig,
        UserCmd::UpdateFullIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserCmd::StartWorker => "start-worker",
            UserCmd::StopWorker => "stop-worker",
            UserCmd::RemoveWorker => "remove-worker",
            UserCmd::DeployPackage => "dp",
            UserCmd::UpdateConfig => "upc",
            UserCmd::UpdateFullIndex => "upf",
        }
    }
}

impl fmt::Display for UserCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserCmd {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserCmd::ALL
            .into_iter()
            .find(|cmd| cmd.as_str() == s)
            .ok_or_else(|| ParseError::new("user command", s))
    }
}

// ── Target kinds ───────────────────────────────────────────────────

/// The three documents kept per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    UserTarget,
    FinalTarget,
    Heartbeat,
}

impl TargetKind {
    pub const ALL: [TargetKind; 3] = [
        TargetKind::UserTarget,
        TargetKind::FinalTarget,
        TargetKind::Heartbeat,
    ];

    /// File stem / key suffix of the document.
    pub fn file_stem(&self) -> &'static str {
        match self {
            TargetKind::UserTarget => "user-target",
            TargetKind::FinalTarget => "final-target",
            TargetKind::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for TargetKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetKind::ALL
            .into_iter()
            .find(|kind| kind.file_stem() == s)
            .ok_or_else(|| ParseError::new("target kind", s))
    }
}

// ── Worker status ──────────────────────────────────────────────────

/// Status a worker reports in its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Unset,
    Running,
    Finished,
    Stopped,
}

impl WorkerStatus {
    /// Running or finished: the worker is expected to keep heartbeating.
    pub fn is_live(&self) -> bool {
        matches!(self, WorkerStatus::Running | WorkerStatus::Finished)
    }
}

// ── Time ───────────────────────────────────────────────────────────

pub fn epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_cmd_wire_names() {
        for cmd in UserCmd::ALL {
            let json = serde_json::to_string(&cmd).unwrap();
            assert_eq!(json, format!("\"{}\"", cmd.as_str()));
            assert_eq!(cmd.as_str().parse::<UserCmd>().unwrap(), cmd);
        }
    }

    #[test]
    fn user_cmd_parse_is_case_sensitive() {
        assert!("Start-Worker".parse::<UserCmd>().is_err());
        assert!("UPC".parse::<UserCmd>().is_err());
    }

    #[test]
    fn target_kind_serializes_upper_case() {
        let json = serde_json::to_string(&TargetKind::FinalTarget).unwrap();
        assert_eq!(json, "\"FINAL_TARGET\"");
        assert_eq!("heartbeat".parse::<TargetKind>().unwrap(), TargetKind::Heartbeat);
    }

    #[test]
    fn role_business_keys() {
        assert_eq!(Role::Bs.business_key(), "index_config");
        assert_eq!(Role::Searcher.business_key(), "searcher_config");
        assert_eq!(Role::Qrs.business_key(), "qrs_config");
        assert!("builder".parse::<Role>().is_err());
    }

    #[test]
    fn worker_key_display_and_sibling() {
        let key = WorkerKey::new("d1", Role::Searcher, "searcher-0");
        assert_eq!(key.to_string(), "d1/searcher/searcher-0");
        assert_eq!(key.table_key(), "d1/searcher/searcher-0");

        let bs = key.sibling(Role::Bs, "bs-0");
        assert_eq!(bs.domain, "d1");
        assert_eq!(bs.role, Role::Bs);
    }

    #[test]
    fn worker_key_parses_its_display_form() {
        let key: WorkerKey = "d1/qrs/qrs-0".parse().unwrap();
        assert_eq!(key, WorkerKey::new("d1", Role::Qrs, "qrs-0"));
        assert!("d1/qrs".parse::<WorkerKey>().is_err());
        assert!("d1/bogus/w".parse::<WorkerKey>().is_err());
        assert!("d1/qrs/a/b".parse::<WorkerKey>().is_err());
    }

    #[test]
    fn worker_status_defaults_unset() {
        assert_eq!(WorkerStatus::default(), WorkerStatus::Unset);
        assert!(WorkerStatus::Running.is_live());
        assert!(WorkerStatus::Finished.is_live());
        assert!(!WorkerStatus::Stopped.is_live());
    }
}
