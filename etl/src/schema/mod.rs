//! Mapping of extracted rows onto the destination table schema.

mod mapper;

pub use mapper::*;
