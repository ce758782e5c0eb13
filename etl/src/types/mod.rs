//! Values, rows and table descriptions shared across the extraction, mapping and load stages.

mod cell;
mod record;
mod row;
mod table;

pub use cell::*;
pub use record::*;
pub use row::*;
pub use table::*;
