//! Event processor — runs the handler chain over each worker.
//!
//! One tick of a worker runs every handler once, in chain order. Before
//! each handler the worker's user-target and final-target are re-read,
//! so a handler always sees what the previous one wrote. Failures are
//! recorded and retried next tick; they never stop the chain.

use std::fmt;
use std::sync::Arc;

use hape_core::{HapeConfig, TargetKind, WorkerKey};
use hape_runtime::WorkerRuntime;
use hape_target::{Target, TargetStore};
use tracing::{debug, error, info, warn};

use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler, Settings};
use crate::handlers::build_chain;

/// What one handler did during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped,
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Per-handler outcomes of one worker tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub worker: WorkerKey,
    pub outcomes: Vec<(&'static str, Outcome)>,
}

impl TickReport {
    pub fn outcome(&self, handler: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| *name == handler)
            .map(|(_, outcome)| outcome)
    }

    pub fn applied(&self) -> Vec<&'static str> {
        self.names_where(|o| *o == Outcome::Applied)
    }

    pub fn failed(&self) -> Vec<&'static str> {
        self.names_where(|o| matches!(o, Outcome::Failed(_)))
    }

    fn names_where(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<&'static str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Drives the handler chain.
pub struct EventProcessor {
    store: Arc<dyn TargetStore>,
    handlers: Vec<Box<dyn Handler>>,
    /// Domains to reconcile; empty means every domain in the store.
    domains: Vec<String>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn TargetStore>, handlers: Vec<Box<dyn Handler>>) -> Self {
        Self {
            store,
            handlers,
            domains: Vec::new(),
        }
    }

    /// Build the chain listed in `[reconcile].handlers`.
    pub fn from_config(
        config: &HapeConfig,
        store: Arc<dyn TargetStore>,
        runtime: Arc<dyn WorkerRuntime>,
    ) -> Self {
        let deps = Deps::new(
            store.clone(),
            runtime,
            config.store.compare_and_swap,
            Settings::from_config(&config.reconcile),
        );
        let handlers = build_chain(&config.reconcile.handlers, &deps);
        info!(
            handlers = ?handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            compare_and_swap = config.store.compare_and_swap,
            "event processor ready"
        );
        Self {
            store,
            handlers,
            domains: config.reconcile.domains.clone(),
        }
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Fresh user-target and final-target of `worker`.
    ///
    /// A user-target already folded into the final-target (same stamp as
    /// its consumption marker) is a leftover of an interrupted commit: it
    /// is deleted and reported as absent.
    fn load(&self, worker: &WorkerKey) -> (Option<Target>, Option<Target>) {
        let final_target = self.store.read(worker, TargetKind::FinalTarget);
        let mut user_target = self.store.read(worker, TargetKind::UserTarget);

        let consumed = final_target.as_ref().and_then(|f| f.consumed_user_target);
        let stamp = user_target.as_ref().and_then(Target::user_stamp);
        if consumed.is_some() && stamp == consumed {
            warn!(%worker, "removing user-target that was already consumed");
            if let Err(e) = self.store.remove(worker, TargetKind::UserTarget) {
                warn!(%worker, error = %e, "failed to remove consumed user-target");
            }
            user_target = None;
        }
        (user_target, final_target)
    }

    /// Run the chain once for `worker`.
    pub fn tick(&self, worker: &WorkerKey) -> TickReport {
        let mut outcomes = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            let name = handler.name();
            let (user_target, final_target) = self.load(worker);
            if user_target.is_none() && final_target.is_none() {
                outcomes.push((name, Outcome::Skipped));
                continue;
            }
            if let Some(cmd) = handler.watch_command() {
                if user_target.as_ref().and_then(|u| u.user_cmd) != Some(cmd) {
                    outcomes.push((name, Outcome::Skipped));
                    continue;
                }
            }

            let outcome = match handler.handle(worker, user_target.as_ref(), final_target.as_ref()) {
                Ok(true) => {
                    debug!(%worker, handler = name, "handler applied");
                    Outcome::Applied
                }
                Ok(false) => Outcome::Skipped,
                Err(e) => {
                    error!(
                        domain = %worker.domain,
                        role = %worker.role,
                        worker = %worker.worker,
                        handler = name,
                        error = %e,
                        "handler failed, retrying next tick"
                    );
                    Outcome::Failed(e.to_string())
                }
            };
            outcomes.push((name, outcome));
        }
        TickReport {
            worker: worker.clone(),
            outcomes,
        }
    }

    /// Every worker to reconcile, per the domain filter.
    pub fn workers(&self) -> ReconcileResult<Vec<WorkerKey>> {
        let domains = if self.domains.is_empty() {
            self.store.list_domains()?
        } else {
            self.domains.clone()
        };
        let mut workers = Vec::new();
        for domain in domains {
            workers.extend(self.store.list_domain_workers(&domain)?);
        }
        Ok(workers)
    }

    /// Tick every worker, one after the other.
    pub fn tick_all(&self) -> ReconcileResult<Vec<TickReport>> {
        let workers = self.workers()?;
        debug!(workers = workers.len(), "reconciling all workers");
        Ok(workers.iter().map(|w| self.tick(w)).collect())
    }
}
