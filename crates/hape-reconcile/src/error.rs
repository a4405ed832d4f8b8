//! Reconciliation error types.

use thiserror::Error;

/// Errors a handler can fail with. The processor records them as a
/// failed outcome and retries on the next tick.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("target store error: {0}")]
    Store(#[from] hape_target::StoreError),

    #[error("runtime error: {0}")]
    Runtime(#[from] hape_runtime::RuntimeError),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
