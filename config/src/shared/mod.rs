mod base;
mod batch;
mod drivers;
mod kms;
mod loader;
mod pipeline;
mod sentry;
mod staging;
mod warehouse;

pub use base::*;
pub use batch::*;
pub use drivers::*;
pub use kms::*;
pub use loader::*;
pub use pipeline::*;
pub use sentry::*;
pub use staging::*;
pub use warehouse::*;
