//! hape-runtime — the container/process runtime seen by the reconciler.
//!
//! The reconciler never manages containers itself. It asks a
//! [`WorkerRuntime`] to start, stop, remove or exec into a worker and
//! treats success as "request accepted", not "operation complete";
//! convergence is observed later through heartbeats.
//!
//! # Implementations
//!
//! - [`ShellRuntime`] — renders command templates from `[runtime]` and
//!   runs them through `sh -c` (or only logs them in dry-run mode).
//! - [`RecordingRuntime`] — test double that records every call.

pub mod error;
pub mod recording;
pub mod shell;

use hape_core::WorkerKey;
use hape_target::{ProcessorInfo, Target};
use serde_json::{Map, Value};

pub use error::{RuntimeError, RuntimeResult};
pub use recording::{RecordingRuntime, RuntimeCall, RuntimeOp};
pub use shell::ShellRuntime;

/// Side-effecting calls into the container/process runtime.
///
/// Calls block until the runtime has accepted (or refused) the request.
pub trait WorkerRuntime: Send + Sync {
    fn start_worker(
        &self,
        worker: &WorkerKey,
        host_init: &Map<String, Value>,
        processor: &ProcessorInfo,
    ) -> RuntimeResult<()>;

    fn stop_worker(&self, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeResult<()>;

    fn remove_worker(&self, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeResult<()>;

    /// Run a shell command inside the worker. Returns its stdout.
    fn worker_execute(
        &self,
        worker: &WorkerKey,
        processor: &ProcessorInfo,
        command: &str,
    ) -> RuntimeResult<String>;

    /// Push a resolved final-target to the worker.
    fn deliver_target(
        &self,
        worker: &WorkerKey,
        processor: &ProcessorInfo,
        target: &Target,
    ) -> RuntimeResult<()>;
}

/// Container name of a worker: the placement's name, else `{domain}_{role}_{worker}`.
pub fn container_name(worker: &WorkerKey, processor: &ProcessorInfo) -> String {
    if processor.container_name.is_empty() {
        format!("{}_{}_{}", worker.domain, worker.role, worker.worker)
    } else {
        processor.container_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hape_core::Role;

    #[test]
    fn container_name_falls_back_to_identity() {
        let worker = WorkerKey::new("d1", Role::Qrs, "qrs-0");
        let mut processor = ProcessorInfo::default();
        assert_eq!(container_name(&worker, &processor), "d1_qrs_qrs-0");

        processor.container_name = "havenask_qrs_0".to_string();
        assert_eq!(container_name(&worker, &processor), "havenask_qrs_0");
    }
}
