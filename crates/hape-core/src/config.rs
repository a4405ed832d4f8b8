//! hape.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HapeConfig {
    pub store: StoreConfig,
    pub reconcile: ReconcileConfig,
    pub runtime: RuntimeConfig,
}

/// Which target store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// JSON files on a filesystem shared with the worker daemons.
    #[default]
    Fs,
    /// Embedded transactional database file.
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory (fs) or database file (redb).
    pub root: PathBuf,
    /// Condition final-target writes on the revision read at handler start.
    pub compare_and_swap: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fs,
            root: PathBuf::from("/var/lib/hape/targets"),
            compare_and_swap: false,
        }
    }
}

/// Handlers that can appear in the reconciliation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    Start,
    Stop,
    Remove,
    AutoIndexLoad,
    QrsSubscribe,
    Upc,
    Dp,
    Upf,
    AutoKeepWorker,
}

impl HandlerKind {
    /// Chain used when hape.toml does not list handlers.
    pub fn default_chain() -> Vec<HandlerKind> {
        vec![
            HandlerKind::Start,
            HandlerKind::Stop,
            HandlerKind::Remove,
            HandlerKind::AutoIndexLoad,
            HandlerKind::QrsSubscribe,
            HandlerKind::Upc,
            HandlerKind::Dp,
            HandlerKind::Upf,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Pause between two passes over all workers (e.g. "5s").
    pub tick_interval: String,
    /// Handler chain, in priority order.
    pub handlers: Vec<HandlerKind>,
    /// Heartbeat age after which a live worker is restarted.
    pub keep_alive_timeout: String,
    /// Upper bound for the spacing between two restarts of one worker.
    pub keep_alive_max_backoff: String,
    /// `pkill -f` pattern matching the worker-side updater process.
    pub updater_pattern: String,
    /// Workers ticked concurrently.
    pub max_parallel_workers: usize,
    /// Domains to reconcile. Empty means every domain found in the store.
    pub domains: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tick_interval: "5s".to_string(),
            handlers: HandlerKind::default_chain(),
            keep_alive_timeout: "180s".to_string(),
            keep_alive_max_backoff: "30m".to_string(),
            updater_pattern: "hape_updater".to_string(),
            max_parallel_workers: 8,
            domains: Vec::new(),
        }
    }
}

impl ReconcileConfig {
    pub fn tick_interval(&self) -> Duration {
        parse_duration(&self.tick_interval).unwrap_or(Duration::from_secs(5))
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        parse_duration(&self.keep_alive_timeout).unwrap_or(Duration::from_secs(180))
    }

    pub fn keep_alive_max_backoff(&self) -> Duration {
        parse_duration(&self.keep_alive_max_backoff).unwrap_or(Duration::from_secs(30 * 60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// Run the command templates through `sh -c`.
    #[default]
    Shell,
    /// Log the rendered commands without running them.
    DryRun,
}

/// Command templates for the container/process runtime.
///
/// Placeholders: `{domain}`, `{role}`, `{worker}`, `{container}`,
/// `{address}`, `{image}`, `{command}`, `{target_path}`, `{host_init.<key>}`.
/// An empty template turns the operation into a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    pub start: String,
    pub stop: String,
    pub remove: String,
    pub execute: String,
    pub deliver: String,
    pub command_timeout: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::Shell,
            start: "docker run -d --name {container} --network host {image}".to_string(),
            stop: "docker stop {container}".to_string(),
            remove: "docker rm -f {container}".to_string(),
            execute: "docker exec {container} sh -c {command}".to_string(),
            deliver: String::new(),
            command_timeout: None,
        }
    }
}

impl RuntimeConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.as_deref().and_then(parse_duration)
    }
}

impl HapeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HapeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A starting hape.toml for a store rooted at `root`.
    pub fn scaffold(root: &Path) -> Self {
        HapeConfig {
            store: StoreConfig {
                root: root.to_path_buf(),
                ..StoreConfig::default()
            },
            ..HapeConfig::default()
        }
    }
}

/// Parse a duration string like "5s", "500ms", "3m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
