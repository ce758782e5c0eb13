use std::sync::Arc;

use crate::types::{Cell, ValueType};

/// Column description as reported by a source driver's result metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Label of the column, which reflects an SQL `AS` alias when one is present.
    pub label: String,
    /// Underlying column name, ignoring any alias.
    pub name: String,
    /// Type name as reported by the driver, e.g. `VARCHAR` or `int8`.
    pub sql_type: String,
}

impl ColumnMetadata {
    pub fn new(
        label: impl Into<String>,
        name: impl Into<String>,
        sql_type: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }

    /// Returns the text identifying this column downstream.
    ///
    /// An empty underlying name falls back to the label, which is what drivers report for
    /// computed expressions.
    pub fn resolve_label(&self, use_column_alias: bool) -> &str {
        if use_column_alias || self.name.is_empty() {
            &self.label
        } else {
            &self.name
        }
    }
}

/// A column of an extracted row with its label resolved and its type mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub label: String,
    pub sql_type: String,
    pub value_type: ValueType,
}

/// One row produced by a source query.
///
/// Values are ordered like the query's result columns. The column descriptions are shared by all
/// rows of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    columns: Arc<[SourceColumn]>,
    values: Vec<Cell>,
}

impl SourceRow {
    /// Creates a row. `values` must be ordered like `columns`.
    pub fn new(columns: Arc<[SourceColumn]>, values: Vec<Cell>) -> Self {
        debug_assert_eq!(columns.len(), values.len());

        Self { columns, values }
    }

    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Returns the value of the column labelled `label`.
    pub fn get(&self, label: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .position(|column| column.label == label)
            .map(|index| &self.values[index])
    }

    /// Iterates over `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&SourceColumn, &Cell)> {
        self.columns.iter().zip(self.values.iter())
    }

    /// Splits the row into its shared column descriptions and owned values.
    pub fn into_parts(self) -> (Arc<[SourceColumn]>, Vec<Cell>) {
        (self.columns, self.values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
