//! Incremental replication engine for externally-owned destinations.
//!
//! The engine moves rows captured from inbound webhooks into tenant-owned
//! destinations: a relational database, a warehouse, or an arbitrary HTTPS
//! endpoint. Each destination is described by a persisted [`store::SyncTarget`]
//! and synced incrementally by [`target::run_sync`], using the adapter layer in
//! [`adapters`] for DDL/merge SQL and the [`connections::ConnectionCache`] for
//! pooled destination connections.

pub mod adapters;
pub mod concurrency;
pub mod connections;
pub mod error;
pub mod export;
pub mod macros;
pub mod source;
pub mod stats;
pub mod store;
pub mod target;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
