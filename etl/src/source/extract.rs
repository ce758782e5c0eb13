use core::pin::Pin;
use core::task::{Context, Poll};
use futures::Stream;
use pin_project_lite::pin_project;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ErrorKind, EtlResult};
use crate::source::{RawRowStream, SourceConnection};
use crate::types::{Cell, ColumnMetadata, SourceColumn, SourceRow, ValueType};
use crate::{bail, etl_error};

/// Maps a source SQL type name to its canonical [`ValueType`].
///
/// Matching ignores case and surrounding whitespace. Names cover the JDBC type names as well as
/// common PostgreSQL spellings such as `int8` or `bpchar`. Returns [`None`] for every type
/// without a canonical counterpart, such as `NUMERIC`, `TIME` or `ARRAY`.
pub fn map_sql_type(sql_type: &str) -> Option<ValueType> {
    let value_type = match sql_type.trim().to_ascii_uppercase().as_str() {
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "INT2" | "INT4" | "INT8" => {
            ValueType::Integer
        }
        "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT4" | "FLOAT8" => {
            ValueType::Float
        }
        "CHAR" | "VARCHAR" | "LONGVARCHAR" | "NCHAR" | "NVARCHAR" | "LONGNVARCHAR" | "CLOB"
        | "NCLOB" | "TEXT" | "BPCHAR" | "NAME" | "CHARACTER" | "CHARACTER VARYING" => {
            ValueType::Text
        }
        "BOOLEAN" | "BOOL" | "BIT" => ValueType::Boolean,
        "DATE" | "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE"
        | "TIMESTAMP_WITH_TIMEZONE" => ValueType::Timestamp,
        "BINARY" | "VARBINARY" | "LONGVARBINARY" | "BLOB" | "BYTEA" => ValueType::Binary,
        "NULL" => ValueType::Null,
        _ => return None,
    };

    Some(value_type)
}

/// Resolves labels and canonical types for the columns of a result set.
///
/// Fails with [`ErrorKind::UnsupportedType`] on the first column whose type has no mapping.
pub fn resolve_columns(
    columns: &[ColumnMetadata],
    use_column_alias: bool,
) -> EtlResult<Vec<SourceColumn>> {
    columns
        .iter()
        .map(|column| {
            let label = column.resolve_label(use_column_alias).to_owned();
            let Some(value_type) = map_sql_type(&column.sql_type) else {
                bail!(
                    ErrorKind::UnsupportedType,
                    "Source column has an unsupported type",
                    format!("column `{label}` has SQL type `{}`", column.sql_type)
                );
            };

            Ok(SourceColumn {
                label,
                sql_type: column.sql_type.clone(),
                value_type,
            })
        })
        .collect()
}

/// Runs the configured query and turns the driver's rows into [`SourceRow`]s.
///
/// With `use_column_alias` the label of each column is the label reported by the result set,
/// which reflects any `AS` alias. Without it, the underlying column name is used.
#[derive(Debug, Clone)]
pub struct QueryExtractor {
    query: String,
    use_column_alias: bool,
}

impl QueryExtractor {
    pub fn new(query: impl Into<String>, use_column_alias: bool) -> Self {
        Self {
            query: query.into(),
            use_column_alias,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Executes the query on `connection`.
    ///
    /// Column types are checked before any row is read. The returned stream is forward-only and
    /// owns the connection, which is closed when the stream is dropped.
    pub async fn extract(&self, connection: Box<dyn SourceConnection>) -> EtlResult<SourceRowStream> {
        info!(use_column_alias = self.use_column_alias, "executing source query");

        let result = connection.execute(&self.query).await.map_err(|err| match err.kind() {
            ErrorKind::ExtractionFailed
            | ErrorKind::SourceConnectionFailed
            | ErrorKind::UnsupportedType => err,
            _ => etl_error!(
                ErrorKind::ExtractionFailed,
                "Failed to execute the source query",
                source: err
            ),
        })?;

        let columns = resolve_columns(&result.columns, self.use_column_alias)?;
        debug!(
            columns = ?columns.iter().map(|column| column.label.as_str()).collect::<Vec<_>>(),
            "resolved source columns"
        );

        Ok(SourceRowStream::new(columns.into(), result.rows))
    }
}

pin_project! {
    /// Lazy sequence of [`SourceRow`]s produced by a query.
    ///
    /// Each raw value is checked against its column's canonical type. The first error ends the
    /// stream and is reported as [`ErrorKind::ExtractionFailed`].
    #[must_use = "streams do nothing unless polled"]
    pub struct SourceRowStream {
        columns: Arc<[SourceColumn]>,
        #[pin]
        rows: RawRowStream,
        rows_read: u64,
        finished: bool,
    }
}

impl SourceRowStream {
    pub fn new(columns: Arc<[SourceColumn]>, rows: RawRowStream) -> Self {
        Self {
            columns,
            rows,
            rows_read: 0,
            finished: false,
        }
    }

    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    /// Returns the shared column descriptions.
    pub fn shared_columns(&self) -> Arc<[SourceColumn]> {
        self.columns.clone()
    }
}

fn check_row(columns: &[SourceColumn], values: &[Cell], row_number: u64) -> EtlResult<()> {
    if values.len() != columns.len() {
        bail!(
            ErrorKind::ExtractionFailed,
            "Source row has an unexpected number of values",
            format!(
                "row {row_number} has {} values for {} columns",
                values.len(),
                columns.len()
            )
        );
    }

    for (column, value) in columns.iter().zip(values) {
        let value_type = value.value_type();
        if value_type != ValueType::Null && value_type != column.value_type {
            bail!(
                ErrorKind::ExtractionFailed,
                "Source value does not match its column type",
                format!(
                    "row {row_number}, column `{}` of type {} holds a {value_type} value",
                    column.label, column.value_type
                )
            );
        }
    }

    Ok(())
}

impl Stream for SourceRowStream {
    type Item = EtlResult<SourceRow>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        let item = match this.rows.poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(None) => {
                *this.finished = true;
                debug!(rows_read = *this.rows_read, "source query exhausted");
                return Poll::Ready(None);
            }
            Poll::Ready(Some(item)) => item,
        };

        *this.rows_read += 1;
        let row_number = *this.rows_read;

        let result = item
            .and_then(|values| {
                check_row(this.columns, &values, row_number)?;
                Ok(SourceRow::new(this.columns.clone(), values))
            })
            .map_err(|err| match err.kind() {
                ErrorKind::ExtractionFailed => err,
                _ => etl_error!(
                    ErrorKind::ExtractionFailed,
                    "Extraction failed while reading rows",
                    format!("after {} rows", row_number - 1),
                    source: err
                ),
            });

        if result.is_err() {
            *this.finished = true;
        }

        Poll::Ready(Some(result))
    }
}
