//! Persistence boundary of the coordination engine.
//!
//! The engine only talks to these three repositories. Brokers sharing one
//! backend share the node tree, the session table and the update log; each
//! adapter is responsible for its own concurrency control.

mod adaptors;
mod node_repository;
mod session_repository;
mod update_log_repository;

pub use adaptors::*;
pub use node_repository::*;
pub use session_repository::*;
pub use update_log_repository::*;
