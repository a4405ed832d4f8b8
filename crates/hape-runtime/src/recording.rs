//! In-memory runtime that records calls instead of acting on them.

use std::collections::HashSet;
use std::sync::Mutex;

use hape_core::WorkerKey;
use hape_target::{ProcessorInfo, Target};
use serde_json::{Map, Value};

use crate::error::{RuntimeError, RuntimeResult};
use crate::WorkerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Start,
    Stop,
    Remove,
    Execute,
    Deliver,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeCall {
    pub op: RuntimeOp,
    pub worker: WorkerKey,
    pub processor: ProcessorInfo,
    /// The command passed to `worker_execute`.
    pub command: Option<String>,
    /// The target passed to `deliver_target`.
    pub target: Option<Target>,
}

/// Runtime test double.
///
/// Every call is recorded, even one that is then failed through
/// [`RecordingRuntime::fail_on`].
#[derive(Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    failing: Mutex<HashSet<RuntimeOp>>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `op` call fail.
    pub fn fail_on(&self, op: RuntimeOp) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_of(&self, op: RuntimeOp) -> Vec<RuntimeCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn count(&self, op: RuntimeOp) -> usize {
        self.calls_of(op).len()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, call: RuntimeCall) -> RuntimeResult<()> {
        let op = call.op;
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&op)
        {
            return Err(RuntimeError::Rejected(format!("{op:?} rejected")));
        }
        Ok(())
    }

    fn call(op: RuntimeOp, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeCall {
        RuntimeCall {
            op,
            worker: worker.clone(),
            processor: processor.clone(),
            command: None,
            target: None,
        }
    }
}

impl WorkerRuntime for RecordingRuntime {
    fn start_worker(
        &self,
        worker: &WorkerKey,
        _host_init: &Map<String, Value>,
        processor: &ProcessorInfo,
    ) -> RuntimeResult<()> {
        self.record(Self::call(RuntimeOp::Start, worker, processor))
    }

    fn stop_worker(&self, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeResult<()> {
        self.record(Self::call(RuntimeOp::Stop, worker, processor))
    }

    fn remove_worker(&self, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeResult<()> {
        self.record(Self::call(RuntimeOp::Remove, worker, processor))
    }

    fn worker_execute(
        &self,
        worker: &WorkerKey,
        processor: &ProcessorInfo,
        command: &str,
    ) -> RuntimeResult<String> {
        let mut call = Self::call(RuntimeOp::Execute, worker, processor);
        call.command = Some(command.to_string());
        self.record(call)?;
        Ok(String::new())
    }

    fn deliver_target(
        &self,
        worker: &WorkerKey,
        processor: &ProcessorInfo,
        target: &Target,
    ) -> RuntimeResult<()> {
        let mut call = Self::call(RuntimeOp::Deliver, worker, processor);
        call.target = Some(target.clone());
        self.record(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hape_core::Role;

    #[test]
    fn records_calls_in_order() {
        let runtime = RecordingRuntime::new();
        let worker = WorkerKey::new("d1", Role::Bs, "bs-0");
        let processor = ProcessorInfo::default();

        runtime.start_worker(&worker, &Map::new(), &processor).unwrap();
        runtime
            .worker_execute(&worker, &processor, "pkill -f hape_updater")
            .unwrap();
        runtime.stop_worker(&worker, &processor).unwrap();

        let ops: Vec<_> = runtime.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![RuntimeOp::Start, RuntimeOp::Execute, RuntimeOp::Stop]);
        assert_eq!(
            runtime.calls_of(RuntimeOp::Execute)[0].command.as_deref(),
            Some("pkill -f hape_updater")
        );
    }

    #[test]
    fn injected_failures_are_still_recorded() {
        let runtime = RecordingRuntime::new();
        let worker = WorkerKey::new("d1", Role::Bs, "bs-0");
        runtime.fail_on(RuntimeOp::Remove);

        let err = runtime
            .remove_worker(&worker, &ProcessorInfo::default())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected(_)));
        assert_eq!(runtime.count(RuntimeOp::Remove), 1);

        runtime.clear_failures();
        runtime.remove_worker(&worker, &ProcessorInfo::default()).unwrap();
        assert_eq!(runtime.count(RuntimeOp::Remove), 2);
    }
}
