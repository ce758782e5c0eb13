use config::shared::TableReference;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Identifier of the destination warehouse table.
///
/// Displayed as `project:dataset.table`, or `dataset.table` when no project is given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationTable {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl DestinationTable {
    pub fn new(project: Option<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project,
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Parses `<project>:<dataset>.<table>`, `<project>.<dataset>.<table>` or `<dataset>.<table>`.
    pub fn parse(value: &str) -> EtlResult<Self> {
        let Some(reference) = TableReference::parse(value) else {
            bail!(
                ErrorKind::ConfigError,
                "Invalid destination table identifier",
                format!("expected `<project>:<dataset>.<table>`, got `{value}`")
            );
        };

        Ok(reference.into())
    }

    /// Returns a copy of this identifier pointing at `table` in the same dataset.
    pub fn sibling(&self, table: impl Into<String>) -> Self {
        Self {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.into(),
        }
    }
}

impl From<TableReference> for DestinationTable {
    fn from(reference: TableReference) -> Self {
        Self {
            project: reference.project,
            dataset: reference.dataset,
            table: reference.table,
        }
    }
}

impl fmt::Display for DestinationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{project}:{}.{}", self.dataset, self.table),
            None => write!(f, "{}.{}", self.dataset, self.table),
        }
    }
}

/// Type of a destination field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int64,
    Float64,
    String,
    Bool,
    /// An instant, stored in UTC.
    Timestamp,
    /// A civil date and time without time zone.
    Datetime,
    Bytes,
}

impl FieldType {
    /// Parses a warehouse type name, accepting the legacy BigQuery aliases.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let field_type = match name.to_ascii_uppercase().as_str() {
            "INT64" | "INTEGER" => FieldType::Int64,
            "FLOAT64" | "FLOAT" => FieldType::Float64,
            "STRING" => FieldType::String,
            "BOOL" | "BOOLEAN" => FieldType::Bool,
            "TIMESTAMP" => FieldType::Timestamp,
            "DATETIME" => FieldType::Datetime,
            "BYTES" => FieldType::Bytes,
            _ => return None,
        };

        Some(field_type)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int64 => "INT64",
            FieldType::Float64 => "FLOAT64",
            FieldType::String => "STRING",
            FieldType::Bool => "BOOL",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Datetime => "DATETIME",
            FieldType::Bytes => "BYTES",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a destination field accepts nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
}

/// A single field of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub mode: FieldMode,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode,
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Nullable)
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Required)
    }

    pub fn is_required(&self) -> bool {
        self.mode == FieldMode::Required
    }
}

/// Known schema of a destination table, in field order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Returns the field named exactly `name`. Matching is case-sensitive.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_qualified_tables() {
        let table = DestinationTable::parse("my-project:sales.orders").unwrap();
        assert_eq!(table.project.as_deref(), Some("my-project"));
        assert_eq!(table.dataset, "sales");
        assert_eq!(table.table, "orders");
        assert_eq!(table.to_string(), "my-project:sales.orders");

        let table = DestinationTable::parse("my-project.sales.orders").unwrap();
        assert_eq!(table.to_string(), "my-project:sales.orders");

        let table = DestinationTable::parse("sales.orders").unwrap();
        assert_eq!(table.project, None);
        assert_eq!(table.to_string(), "sales.orders");
    }

    #[test]
    fn rejects_malformed_tables() {
        let err = DestinationTable::parse("orders").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(DestinationTable::parse("p:d.t.x").is_err());
    }

    #[test]
    fn field_lookup_is_case_sensitive() {
        let schema = TableSchema::new(vec![FieldSchema::nullable("id", FieldType::Int64)]);

        assert!(schema.field("id").is_some());
        assert!(schema.field("ID").is_none());
    }

    #[test]
    fn parses_legacy_type_names() {
        assert_eq!(FieldType::from_type_name("integer"), Some(FieldType::Int64));
        assert_eq!(FieldType::from_type_name("FLOAT"), Some(FieldType::Float64));
        assert_eq!(FieldType::from_type_name("NUMERIC"), None);
    }
}
