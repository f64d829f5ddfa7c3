//! ZooKeeper-style coordination engine.
//!
//! A versioned hierarchical node tree with one-shot watches, ephemeral nodes
//! tied to session liveness, and propagation of node events between brokers
//! that share one store.

mod broker;
mod config;
mod errors;
mod propagation;
mod session;
mod storage;
mod tree;
mod watch;

pub mod constants;
pub mod metrics;
pub mod utils;

pub use broker::*;
pub use config::*;
pub use errors::*;
pub use propagation::*;
pub use session::*;
pub use storage::*;
pub use tree::*;
pub use watch::*;


//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
