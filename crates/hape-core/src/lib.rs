pub mod config;
pub mod types;

pub use config::{HandlerKind, HapeConfig};
pub use types::*;
