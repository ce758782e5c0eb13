//! Key-management backends used to decrypt credentials.

mod base;
mod cloud;
mod local;

pub use base::*;
pub use cloud::*;
pub use local::*;
