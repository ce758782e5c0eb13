use std::future::Future;

use crate::error::EtlResult;
use crate::load::staging::StagingStore;
use crate::load::{LoadMode, StagedLoad};
use crate::types::{DestinationTable, TableSchema};

/// A columnar warehouse that receives the rows of a load run.
///
/// The warehouse supplies the destination schema before extraction starts and later applies all
/// staged batches of a run in one commit. A commit is all-or-nothing: on failure the table keeps
/// exactly the contents it had before the commit started, in both load modes.
///
/// Only one commit per destination table may be in flight. Serializing runs that target the same
/// table is up to the caller.
pub trait Warehouse: Send + Sync {
    /// Returns the name of the warehouse.
    fn name() -> &'static str;

    /// Returns the schema of `table`.
    ///
    /// Fails with [`crate::error::ErrorKind::DestinationTableMissing`] if the table does not exist.
    fn table_schema(
        &self,
        table: &DestinationTable,
    ) -> impl Future<Output = EtlResult<TableSchema>> + Send;

    /// Applies every batch of `load`, read from `staging`, to `table` under `mode` and returns
    /// the number of rows written.
    ///
    /// Failures are reported with one of the load error kinds, see
    /// [`crate::error::ErrorKind::is_load_error`].
    fn commit<S>(
        &self,
        table: &DestinationTable,
        schema: &TableSchema,
        staging: &S,
        load: &StagedLoad,
        mode: LoadMode,
    ) -> impl Future<Output = EtlResult<u64>> + Send
    where
        S: StagingStore;
}
