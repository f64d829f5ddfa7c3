//! Broker assembly.
//!
//! A broker wires one node store, its watch machinery, the update propagator,
//! the log compactor and the session liveness monitor over a set of
//! repositories that may be shared with other brokers.
//!
//! ## Example Usage
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let broker = Arc::new(BrokerBuilder::new(config, shutdown_rx).build()?);
//! tokio::spawn({
//!     let broker = broker.clone();
//!     async move { broker.run().await }
//! });
//! let session = broker.open_session(6_000)?;
//! broker.node_store().create(session.session_id, "/lock", None, CreateMode::Ephemeral)?;
//! ```

mod broker;
mod builder;

pub use broker::*;
pub use builder::*;
