use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{
    Cell, DestinationRecord, FieldSchema, FieldType, SourceColumn, SourceRow, TableSchema, ValueType,
};

/// Returns `true` if values of `value_type` may be loaded into a field of `field_type`.
///
/// Nulls fit every field. Integers widen to floats and timestamps may be written to civil date
/// time fields as their UTC wall-clock time. Every other pair is rejected, including any
/// conversion out of text.
pub fn is_coercible(value_type: ValueType, field_type: FieldType) -> bool {
    match (value_type, field_type) {
        (ValueType::Null, _) => true,
        (ValueType::Integer, FieldType::Int64 | FieldType::Float64) => true,
        (ValueType::Float, FieldType::Float64) => true,
        (ValueType::Text, FieldType::String) => true,
        (ValueType::Boolean, FieldType::Bool) => true,
        (ValueType::Timestamp, FieldType::Timestamp | FieldType::Datetime) => true,
        (ValueType::Binary, FieldType::Bytes) => true,
        _ => false,
    }
}

/// Converts `cell` into the representation stored for `field`.
///
/// Fails with [`ErrorKind::SchemaMismatch`] when the pair is not allowed by [`is_coercible`].
pub fn coerce_cell(cell: Cell, field: &FieldSchema) -> EtlResult<Cell> {
    let value_type = cell.value_type();
    if !is_coercible(value_type, field.field_type) {
        bail!(
            ErrorKind::SchemaMismatch,
            "Source value does not fit the destination field",
            mismatch_detail(&field.name, value_type, field.field_type)
        );
    }

    let cell = match (cell, field.field_type) {
        (Cell::Integer(value), FieldType::Float64) => Cell::Float(value as f64),
        (cell, _) => cell,
    };

    Ok(cell)
}

fn mismatch_detail(field: &str, value_type: ValueType, field_type: FieldType) -> String {
    format!("field `{field}`: source type {value_type} cannot be written as {field_type}")
}

/// Turns [`SourceRow`]s into [`DestinationRecord`]s for one destination table schema.
///
/// Columns are matched to fields by exact, case-sensitive label. Columns without a field are
/// dropped and fields without a column stay absent from the record. Mapping a row does not touch
/// any shared mutable state, so rows may be mapped in parallel.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    schema: Arc<TableSchema>,
}

impl SchemaMapper {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Checks the declared column types of a query against the schema before any row is read.
    ///
    /// Columns of type null are accepted here since their values are checked row by row. Two
    /// columns resolving to the same destination field are rejected, as one would silently
    /// overwrite the other.
    pub fn check_columns(&self, columns: &[SourceColumn]) -> EtlResult<()> {
        let mut matched = HashSet::new();

        for column in columns {
            let Some(field) = self.schema.field(&column.label) else {
                debug!(column = %column.label, "source column has no destination field and is dropped");
                continue;
            };

            if !matched.insert(field.name.as_str()) {
                bail!(
                    ErrorKind::SchemaMismatch,
                    "Several source columns map to the same destination field",
                    format!("field `{}`", field.name)
                );
            }
            if !is_coercible(column.value_type, field.field_type) {
                bail!(
                    ErrorKind::SchemaMismatch,
                    "Source column does not fit the destination field",
                    format!(
                        "{} (SQL type `{}`)",
                        mismatch_detail(&field.name, column.value_type, field.field_type),
                        column.sql_type
                    )
                );
            }
        }

        debug!(
            columns = columns.len(),
            matched = matched.len(),
            fields = self.schema.fields.len(),
            "checked source columns against destination schema"
        );

        Ok(())
    }

    /// Maps one row onto the destination schema.
    pub fn map_row(&self, row: SourceRow) -> EtlResult<DestinationRecord> {
        let (columns, values) = row.into_parts();
        let mut record = DestinationRecord::new();

        for (column, value) in columns.iter().zip(values) {
            let Some(field) = self.schema.field(&column.label) else {
                continue;
            };

            record.insert(field.name.clone(), coerce_cell(value, field)?);
        }

        Ok(record)
    }

    /// Maps a batch of rows, failing on the first row that does not fit.
    pub fn map_rows(&self, rows: Vec<SourceRow>) -> EtlResult<Vec<DestinationRecord>> {
        rows.into_iter().map(|row| self.map_row(row)).collect()
    }
}
