//! hape-target — per-worker target documents and their storage.
//!
//! Each worker, identified by `(domain, role, worker)`, owns up to three
//! documents: the pending **user-target**, the reconciled
//! **final-target** and the worker-written **heartbeat**.
//!
//! # Backends
//!
//! - [`FsTargetStore`] — JSON files under
//!   `<root>/<domain>/<role>/<worker>/heartbeats/`, shared with the
//!   worker daemons.
//! - [`RedbTargetStore`] — redb database, on disk or in memory. Commits
//!   are single transactions.
//!
//! Both implement [`TargetStore`]. Every write bumps the document's
//! `revision`, which callers may pass back as a
//! [`WritePrecondition::MatchesRevision`] to turn last-writer-wins into
//! compare-and-swap.

pub mod db;
pub mod error;
pub mod fs;
pub mod store;
pub mod tables;
pub mod types;

pub use db::RedbTargetStore;
pub use error::{StoreError, StoreResult};
pub use fs::FsTargetStore;
pub use store::{doc_key, RetireMode, TargetStore, WritePrecondition, WriteResult};
pub use types::*;

use std::sync::Arc;

use hape_core::config::{StoreBackend, StoreConfig};

/// Open the backend named in `[store]`.
pub fn open(config: &StoreConfig) -> StoreResult<Arc<dyn TargetStore>> {
    let store: Arc<dyn TargetStore> = match config.backend {
        StoreBackend::Fs => Arc::new(FsTargetStore::open(&config.root)?),
        StoreBackend::Redb => Arc::new(RedbTargetStore::open(&config.root)?),
    };
    Ok(store)
}
