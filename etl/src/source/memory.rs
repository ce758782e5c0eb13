use async_trait::async_trait;
use config::shared::JDBC_URL_PREFIX;
use futures::StreamExt;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ErrorKind, EtlResult};
use crate::source::{QueryResult, ResolvedConnection, SourceConnection, SourceDriver};
use crate::types::{Cell, ColumnMetadata};
use crate::{bail, etl_error};

/// Driver class name of the [`MemoryDriver`].
pub const MEMORY_DRIVER_CLASS_NAME: &str = "etl.source.MemoryDriver";

/// A canned result set served by the [`MemoryDriver`].
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSet {
    columns: Vec<ColumnMetadata>,
    rows: Vec<Vec<Cell>>,
    fail_after: Option<usize>,
}

impl MemoryResultSet {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            fail_after: None,
        }
    }

    pub fn with_row(mut self, row: Vec<Cell>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<Cell>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Makes the result set drop its connection after yielding `rows` rows.
    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    result_sets: HashMap<String, MemoryResultSet>,
    refuse_connections: bool,
    connections: Vec<ResolvedConnection>,
    executed_queries: Vec<String>,
}

/// In-memory source that serves result sets keyed by query text.
///
/// Queries are matched after trimming surrounding whitespace. Accepts any `jdbc:` URL. Clones
/// share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `result_set` for `query`.
    pub async fn add_result_set(&self, query: &str, result_set: MemoryResultSet) {
        let mut inner = self.inner.lock().await;
        inner.result_sets.insert(query.trim().to_owned(), result_set);
    }

    /// Makes every subsequent connection attempt fail.
    pub async fn refuse_connections(&self) {
        let mut inner = self.inner.lock().await;
        inner.refuse_connections = true;
    }

    /// Returns the connection parameters received so far.
    pub async fn connections(&self) -> Vec<ResolvedConnection> {
        let inner = self.inner.lock().await;
        inner.connections.clone()
    }

    /// Returns the queries executed so far.
    pub async fn executed_queries(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.executed_queries.clone()
    }
}

#[async_trait]
impl SourceDriver for MemoryDriver {
    fn class_name(&self) -> &'static str {
        MEMORY_DRIVER_CLASS_NAME
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with(JDBC_URL_PREFIX)
    }

    async fn connect(&self, connection: ResolvedConnection) -> EtlResult<Box<dyn SourceConnection>> {
        let mut inner = self.inner.lock().await;
        if inner.refuse_connections {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Memory source refused the connection"
            );
        }

        inner.connections.push(connection);
        info!("opened memory source connection");

        Ok(Box::new(MemoryConnection {
            inner: self.inner.clone(),
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl SourceConnection for MemoryConnection {
    async fn execute(self: Box<Self>, query: &str) -> EtlResult<QueryResult> {
        let mut inner = self.inner.lock().await;
        inner.executed_queries.push(query.to_owned());

        let Some(result_set) = inner.result_sets.get(query.trim()).cloned() else {
            bail!(
                ErrorKind::ExtractionFailed,
                "Query is not known to the memory source",
                query
            );
        };

        let MemoryResultSet {
            columns,
            rows,
            fail_after,
        } = result_set;

        let row_count = rows.len();
        let mut items = Vec::with_capacity(row_count + 1);
        for (index, row) in rows.into_iter().enumerate() {
            if fail_after == Some(index) {
                break;
            }
            items.push(Ok(row));
        }

        if let Some(index) = fail_after {
            items.push(Err(etl_error!(
                ErrorKind::SourceConnectionFailed,
                "Memory source connection dropped",
                format!("after {} rows", index.min(row_count))
            )));
        }

        Ok(QueryResult {
            columns,
            rows: stream::iter(items).boxed(),
        })
    }
}
