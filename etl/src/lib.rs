//! Batch loading of JDBC query results into columnar warehouse tables.
//!
//! A load run resolves the configured credentials, opens one source connection, streams the
//! query's rows through the destination schema and commits them into the destination table from
//! a staging area, either appending to or atomically replacing its contents.
//!
//! The building blocks are usable on their own:
//!
//! - [`secret`] decrypts credential-bearing configuration fields.
//! - [`source`] validates connection parameters, selects drivers and extracts rows.
//! - [`schema`] maps extracted rows onto the destination schema.
//! - [`load`] stages mapped records and commits them through a [`load::warehouse::Warehouse`].
//! - [`pipeline`] wires all of them into a single run.

pub mod concurrency;
pub mod error;
pub mod failpoints;
pub mod load;
mod macros;
pub mod pipeline;
pub mod schema;
pub mod secret;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
