//! Restart workers whose heartbeat went silent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hape_core::{epoch_millis, TargetKind, UserCmd, WorkerKey, WorkerStatus};
use hape_target::Target;
use tracing::{debug, warn};

use crate::error::ReconcileResult;
use crate::handler::{Deps, Handler};

/// Spacing between restarts of one worker.
///
/// Starts at the keep-alive timeout and doubles on every restart up to
/// the configured maximum.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    last_restart: Instant,
    current: Duration,
    max: Duration,
    restarts: u32,
}

impl RestartBackoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            last_restart: Instant::now(),
            current: base.min(max),
            max,
            restarts: 1,
        }
    }

    /// Whether enough time has passed since the previous restart.
    fn ready(&self) -> bool {
        self.last_restart.elapsed() >= self.current
    }

    fn record_restart(&mut self) {
        self.last_restart = Instant::now();
        self.current = (self.current * 2).min(self.max);
        self.restarts += 1;
    }

    /// Wait before the next restart is allowed.
    pub fn next_interval(&self) -> Duration {
        self.current
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

/// Re-issues `start_worker` for live workers with a stale heartbeat.
pub struct KeepWorkerHandler {
    deps: Deps,
    backoff: Mutex<HashMap<WorkerKey, RestartBackoff>>,
}

impl KeepWorkerHandler {
    pub fn new(deps: Deps) -> Self {
        Self {
            deps,
            backoff: Mutex::new(HashMap::new()),
        }
    }

    /// Restart backoff of `worker`, if it has been restarted since its
    /// heartbeat was last fresh.
    pub fn backoff(&self, worker: &WorkerKey) -> Option<RestartBackoff> {
        self.backoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(worker)
            .cloned()
    }

    /// Drop the backoff of a worker that no longer needs keeping alive.
    fn forget(&self, worker: &WorkerKey) {
        self.backoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(worker);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.backoff.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Heartbeat age. The worker-reported `timestamp` (seconds) wins over
/// the store stamp.
fn heartbeat_age(heartbeat: &Target) -> Option<Duration> {
    let millis = heartbeat
        .timestamp
        .map(|secs| secs.saturating_mul(1000))
        .or(heartbeat.timestamps.heartbeat)?;
    let age = epoch_millis().saturating_sub(millis).max(0);
    Some(Duration::from_millis(age as u64))
}

impl Handler for KeepWorkerHandler {
    fn name(&self) -> &'static str {
        "auto-keep-worker"
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
        let Some(previous) = final_target.filter(|f| f.status != WorkerStatus::Stopped) else {
            self.forget(worker);
            return Ok(false);
        };
        let heartbeat = self
            .deps
            .store
            .read(worker, TargetKind::Heartbeat)
            .filter(|hb| hb.reported_status().is_live());
        let Some(age) = heartbeat.as_ref().and_then(heartbeat_age) else {
            self.forget(worker);
            return Ok(false);
        };

        let timeout = self.deps.settings.keep_alive_timeout;
        {
            let mut backoff = self.backoff.lock().unwrap_or_else(|e| e.into_inner());
            let horizon = self.deps.settings.keep_alive_max_backoff * 2;
            backoff.retain(|_, entry| entry.last_restart.elapsed() < horizon);
            if age <= timeout {
                if backoff.remove(worker).is_some() {
                    debug!(%worker, "heartbeat fresh again, restart backoff reset");
                }
                return Ok(false);
            }
            if let Some(entry) = backoff.get(worker) {
                if !entry.ready() {
                    debug!(
                        %worker,
                        wait_ms = entry.next_interval().as_millis() as u64,
                        "worker restart backing off"
                    );
                    return Ok(false);
                }
            }
        }

        warn!(
            domain = %worker.domain,
            role = %worker.role,
            worker = %worker.worker,
            age_secs = age.as_secs(),
            "heartbeat stale, restarting worker"
        );
        self.deps
            .runtime
            .start_worker(worker, &previous.host_init, &previous.plan.processor_info)?;
        self.deps
            .distributor
            .distribute(worker, previous, Some(previous.revision), None)?;

        let max = self.deps.settings.keep_alive_max_backoff;
        self.backoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(worker.clone())
            .and_modify(RestartBackoff::record_restart)
            .or_insert_with(|| RestartBackoff::new(timeout, max));
        Ok(true)
    }
}
