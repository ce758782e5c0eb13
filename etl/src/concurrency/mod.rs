//! Concurrency primitives for a single load run.
//!
//! The [`shutdown`] channel carries cancellation from the caller into the run, and [`stream`]
//! groups extracted rows into bounded batches while watching that channel so row production
//! stops as soon as cancellation is observed.

pub mod shutdown;
pub mod signal;
pub mod stream;
