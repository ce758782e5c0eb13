//! Source side of a load run: drivers, connection assembly and query extraction.

mod base;
mod connection;
mod driver;
mod extract;
pub mod memory;
pub mod postgres;

pub use base::*;
pub use connection::*;
pub use driver::*;
pub use extract::*;
