//! Testing utilities for load runs.
//!
//! Everything here runs without external services: sources are served by
//! [`crate::source::memory::MemoryDriver`], staged batches live in
//! [`crate::load::staging::memory::MemoryStagingStore`] and commits land in
//! [`crate::load::warehouse::memory::MemoryWarehouse`].
//!
//! The [`table`] module holds a small `users` fixture shared by unit and integration tests,
//! [`pipeline`] builds pipeline configurations and pipelines around the in-memory components and
//! [`failpoints`] configures fail points for the duration of a test.

pub mod failpoints;
pub mod pipeline;
pub mod table;
