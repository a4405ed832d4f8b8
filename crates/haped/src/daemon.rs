//! Reconciliation loop.
//!
//! Every pass discovers the workers in the store and ticks them on the
//! blocking pool, at most `max_parallel_workers` at a time. A pass ends
//! when every tick has finished, so one worker is never ticked twice
//! concurrently.

use std::sync::Arc;
use std::time::Duration;

use hape_core::WorkerKey;
use hape_reconcile::{EventProcessor, TickReport};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Totals of one pass over all workers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub workers: usize,
    pub applied: usize,
    pub failed: usize,
}

impl PassSummary {
    fn add(&mut self, report: &TickReport) {
        self.workers += 1;
        self.applied += report.applied().len();
        self.failed += report.failed().len();
    }
}

pub struct Daemon {
    processor: Arc<EventProcessor>,
    interval: Duration,
    limit: Arc<Semaphore>,
}

impl Daemon {
    pub fn new(processor: EventProcessor, interval: Duration, max_parallel_workers: usize) -> Self {
        Self {
            processor: Arc::new(processor),
            interval,
            limit: Arc::new(Semaphore::new(max_parallel_workers.max(1))),
        }
    }

    /// Tick one worker on the blocking pool.
    pub async fn tick_worker(&self, worker: WorkerKey) -> anyhow::Result<TickReport> {
        let processor = self.processor.clone();
        let report = tokio::task::spawn_blocking(move || processor.tick(&worker)).await?;
        Ok(report)
    }

    /// Tick every worker once.
    pub async fn pass(&self) -> anyhow::Result<PassSummary> {
        let processor = self.processor.clone();
        let workers = tokio::task::spawn_blocking(move || processor.workers()).await??;

        let mut ticks = JoinSet::new();
        for worker in workers {
            let permit = self.limit.clone().acquire_owned().await?;
            let processor = self.processor.clone();
            ticks.spawn_blocking(move || {
                let report = processor.tick(&worker);
                drop(permit);
                report
            });
        }

        let mut summary = PassSummary::default();
        while let Some(joined) = ticks.join_next().await {
            match joined {
                Ok(report) => {
                    for (handler, outcome) in &report.outcomes {
                        debug!(worker = %report.worker, handler, %outcome, "tick outcome");
                    }
                    summary.add(&report);
                }
                Err(e) => error!(error = %e, "worker tick panicked"),
            }
        }
        Ok(summary)
    }

    /// Run passes until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            handlers = ?self.processor.handler_names(),
            "reconciliation loop started"
        );

        loop {
            match self.pass().await {
                Ok(summary) if summary.applied > 0 || summary.failed > 0 => {
                    info!(
                        workers = summary.workers,
                        applied = summary.applied,
                        failed = summary.failed,
                        "reconciliation pass"
                    );
                }
                Ok(summary) => debug!(workers = summary.workers, "reconciliation pass, nothing to do"),
                Err(e) => warn!(error = %e, "reconciliation pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("reconciliation loop shutting down");
                    break;
                }
            }
        }
    }
}
