//! Staging and committing of mapped records.

mod batch;
mod coordinator;
mod encoding;
pub mod staging;
pub mod warehouse;

pub use batch::*;
pub use coordinator::*;
pub use encoding::*;
