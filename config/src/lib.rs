//! Shared configuration for the tablesync services.
//!
//! Contains the serde models consumed by the sync engine plus the layered
//! loading machinery (base file, environment file, `APP`-prefixed env vars).

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadSettingsError, load_settings};
