//! The `Handler` trait and the dependencies handlers are built with.

use std::sync::Arc;
use std::time::Duration;

use hape_core::config::ReconcileConfig;
use hape_core::{UserCmd, WorkerKey};
use hape_runtime::WorkerRuntime;
use hape_target::{Target, TargetStore};

use crate::distribute::Distributor;
use crate::error::ReconcileResult;

/// One reconciliation rule.
///
/// A handler with a `watch_command` only runs while the worker's pending
/// user-target carries that command. Handlers without one run every tick.
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    fn watch_command(&self) -> Option<UserCmd>;

    /// Reconcile one worker. `Ok(true)` means the handler acted.
    fn handle(
        &self,
        worker: &WorkerKey,
        user_target: Option<&Target>,
        final_target: Option<&Target>,
    ) -> ReconcileResult<bool>;
}

/// Tunables handlers read from `[reconcile]`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `pkill -f` pattern for the worker-side updater process.
    pub updater_pattern: String,
    pub keep_alive_timeout: Duration,
    pub keep_alive_max_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

impl Settings {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            updater_pattern: config.updater_pattern.clone(),
            keep_alive_timeout: config.keep_alive_timeout(),
            keep_alive_max_backoff: config.keep_alive_max_backoff(),
        }
    }
}

/// Everything a handler needs, shared between all handlers of a chain.
#[derive(Clone)]
pub struct Deps {
    pub store: Arc<dyn TargetStore>,
    pub runtime: Arc<dyn WorkerRuntime>,
    pub distributor: Arc<Distributor>,
    pub settings: Settings,
}

impl Deps {
    pub fn new(
        store: Arc<dyn TargetStore>,
        runtime: Arc<dyn WorkerRuntime>,
        compare_and_swap: bool,
        settings: Settings,
    ) -> Self {
        let distributor = Arc::new(Distributor::new(
            store.clone(),
            runtime.clone(),
            compare_and_swap,
        ));
        Self {
            store,
            runtime,
            distributor,
            settings,
        }
    }
}
