use crate::load::warehouse::memory::MemoryWarehouse;
use crate::source::memory::MemoryResultSet;
use crate::types::{
    Cell, ColumnMetadata, DestinationRecord, DestinationTable, FieldSchema, FieldType, TableSchema,
};

/// Output table of the `users` fixture.
pub const USERS_OUTPUT_TABLE: &str = "test-project:test_dataset.users";

/// Source query of the `users` fixture. The `name` column is aliased to `full_name`.
pub const USERS_QUERY: &str = "select id, name as full_name from users";

pub fn users_table() -> DestinationTable {
    DestinationTable::new(Some("test-project".to_owned()), "test_dataset", "users")
}

/// Destination schema of the `users` table.
///
/// Both `full_name` and `name` exist so that the same source can be loaded with and without
/// column aliases.
pub fn users_schema() -> TableSchema {
    TableSchema::new(vec![
        FieldSchema::required("id", FieldType::Int64),
        FieldSchema::nullable("full_name", FieldType::String),
        FieldSchema::nullable("name", FieldType::String),
    ])
}

pub fn users_columns() -> Vec<ColumnMetadata> {
    vec![
        ColumnMetadata::new("id", "id", "BIGINT"),
        ColumnMetadata::new("full_name", "name", "VARCHAR"),
    ]
}

/// Result set of [`USERS_QUERY`] holding `rows` as `(id, name)` pairs.
pub fn users_result_set(rows: &[(i64, &str)]) -> MemoryResultSet {
    MemoryResultSet::new(users_columns()).with_rows(
        rows.iter()
            .map(|(id, name)| vec![Cell::Integer(*id), Cell::Text((*name).to_owned())]),
    )
}

/// Expected destination record for a user loaded under `field`.
pub fn user_record(id: i64, field: &str, name: &str) -> DestinationRecord {
    DestinationRecord::from_iter([
        ("id".to_owned(), Cell::Integer(id)),
        (field.to_owned(), Cell::Text(name.to_owned())),
    ])
}

/// Creates the empty `users` table in `warehouse` and returns its identifier.
pub async fn create_users_table(warehouse: &MemoryWarehouse) -> DestinationTable {
    let table = users_table();
    warehouse.create_table(table.clone(), users_schema()).await;

    table
}
