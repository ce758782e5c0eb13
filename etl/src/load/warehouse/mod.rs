//! Destination warehouses that commit staged loads.

mod base;
#[cfg(feature = "bigquery")]
pub mod bigquery;
pub mod memory;

pub use base::*;
