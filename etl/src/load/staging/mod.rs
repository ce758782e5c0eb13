//! Durable storage for batches between staging and commit.

mod base;
pub mod fs;
pub mod memory;

pub use base::*;
