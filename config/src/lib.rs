//! Configuration management for the JDBC loader.
//!
//! Provides environment detection, hierarchical configuration loading from YAML/JSON files and
//! `APP_` environment variables, secret handling, and the shared configuration types consumed by
//! the `etl` core and the `loader` binary.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
