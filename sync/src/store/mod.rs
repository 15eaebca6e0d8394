//! Persisted sync target state.
//!
//! One row per sync target, behind the [`TargetStore`] trait so the
//! orchestrator never touches SQL directly. [`PostgresTargetStore`] is the
//! production implementation; [`MemoryTargetStore`] backs tests.

mod base;
mod memory;
mod postgres;

pub use base::{DestinationKind, SyncTarget, TargetLock, TargetStore};
pub use memory::MemoryTargetStore;
pub use postgres::PostgresTargetStore;
