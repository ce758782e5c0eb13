//! Resolution of credential-bearing configuration fields into plaintext.

pub mod kms;
mod resolver;

pub use resolver::*;
