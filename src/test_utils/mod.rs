//! Shared fixtures for unit tests: recording watchers and node stores over
//! the in-memory backend.
mod common;
mod watchers;

pub use common::*;
pub use watchers::*;
