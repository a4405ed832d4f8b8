//! hape-reconcile — turns operator user-targets and worker heartbeats
//! into final-targets.
//!
//! # Architecture
//!
//! ```text
//! EventProcessor (per worker tick)
//!   ├── TargetStore (fresh user-target / final-target before each handler)
//!   └── Handler chain, in configured order
//!       ├── command handlers (start, stop, remove, upc, dp, upf)
//!       ├── background handlers (auto-index-load, qrs-subscribe, auto-keep-worker)
//!       └── Deps
//!           ├── WorkerRuntime (start / stop / remove / execute)
//!           └── Distributor (commit final-target, deliver to worker)
//! ```

pub mod distribute;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod processor;

pub use distribute::Distributor;
pub use error::{ReconcileError, ReconcileResult};
pub use handler::{Deps, Handler, Settings};
pub use processor::{EventProcessor, Outcome, TickReport};
