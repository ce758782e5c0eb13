//! Tracing setup shared by the loader binary and the test suites.

mod tracing;

pub use tracing::*;
