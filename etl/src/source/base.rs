use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

use crate::error::EtlResult;
use crate::source::ResolvedConnection;
use crate::types::{Cell, ColumnMetadata};

/// Raw rows produced by a driver, each ordered like [`QueryResult::columns`].
pub type RawRowStream = BoxStream<'static, EtlResult<Vec<Cell>>>;

/// Result of executing a query: column metadata known up front and a lazy row sequence.
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: RawRowStream,
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// A source database driver, identified by its JDBC driver class name.
///
/// Drivers translate a [`ResolvedConnection`] into a live connection. Failing to connect is
/// reported as [`crate::error::ErrorKind::SourceConnectionFailed`].
#[async_trait]
pub trait SourceDriver: fmt::Debug + Send + Sync {
    /// Returns the JDBC driver class name this driver answers to.
    fn class_name(&self) -> &'static str;

    /// Returns `true` if this driver understands `url`.
    fn accepts_url(&self, url: &str) -> bool;

    /// Opens a connection, consuming the resolved connection parameters.
    async fn connect(&self, connection: ResolvedConnection) -> EtlResult<Box<dyn SourceConnection>>;
}

/// An open connection to a source database.
///
/// A connection runs a single query. It is consumed by [`SourceConnection::execute`] and closed
/// once the returned rows are exhausted or dropped.
#[async_trait]
pub trait SourceConnection: Send {
    async fn execute(self: Box<Self>, query: &str) -> EtlResult<QueryResult>;
}
