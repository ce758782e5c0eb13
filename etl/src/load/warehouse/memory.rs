use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::load::staging::StagingStore;
use crate::load::warehouse::Warehouse;
use crate::load::{LoadMode, StagedLoad, decode_batch};
use crate::types::{Cell, DestinationRecord, DestinationTable, TableSchema};

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<DestinationRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<DestinationTable, MemoryTable>,
    max_rows_per_load: Option<usize>,
    commits: usize,
}

/// In-memory warehouse for testing and development purposes.
///
/// Commits decode and validate every staged row before the table is touched, then replace or
/// extend the table's rows while holding the warehouse lock, so readers never see a partially
/// applied load.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects loads larger than `max_rows` with [`ErrorKind::LoadQuotaExceeded`].
    pub async fn set_max_rows_per_load(&self, max_rows: usize) {
        self.inner.lock().await.max_rows_per_load = Some(max_rows);
    }

    /// Creates an empty table, replacing any existing table with the same identifier.
    pub async fn create_table(&self, table: DestinationTable, schema: TableSchema) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            table,
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    /// Appends `rows` to an existing table without going through staging.
    pub async fn insert_rows(
        &self,
        table: &DestinationTable,
        rows: Vec<DestinationRecord>,
    ) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(memory_table) = inner.tables.get_mut(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                table
            );
        };

        memory_table.rows.extend(rows);

        Ok(())
    }

    /// Returns a copy of the rows of `table`, or [`None`] if the table does not exist.
    pub async fn rows(&self, table: &DestinationTable) -> Option<Vec<DestinationRecord>> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|table| table.rows.clone())
    }

    /// Returns the number of commits applied so far.
    pub async fn commits(&self) -> usize {
        self.inner.lock().await.commits
    }
}

fn validate_required_fields(schema: &TableSchema, record: &DestinationRecord) -> EtlResult<()> {
    for field in schema.fields.iter().filter(|field| field.is_required()) {
        if record.get(&field.name).is_none_or(Cell::is_null) {
            bail!(
                ErrorKind::LoadSchemaValidationFailed,
                "Required destination field is missing a value",
                field.name
            );
        }
    }

    Ok(())
}

impl Warehouse for MemoryWarehouse {
    fn name() -> &'static str {
        "memory"
    }

    async fn table_schema(&self, table: &DestinationTable) -> EtlResult<TableSchema> {
        let inner = self.inner.lock().await;
        let Some(memory_table) = inner.tables.get(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                table
            );
        };

        Ok(memory_table.schema.clone())
    }

    async fn commit<S>(
        &self,
        table: &DestinationTable,
        schema: &TableSchema,
        staging: &S,
        load: &StagedLoad,
        mode: LoadMode,
    ) -> EtlResult<u64>
    where
        S: StagingStore,
    {
        let mut inner = self.inner.lock().await;
        let max_rows_per_load = inner.max_rows_per_load;

        let Some(memory_table) = inner.tables.get_mut(table) else {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Destination table does not exist",
                table
            );
        };

        if memory_table.schema != *schema {
            bail!(
                ErrorKind::LoadSchemaValidationFailed,
                "Destination schema changed since the run started",
                table
            );
        }

        if let Some(max_rows) = max_rows_per_load
            && load.rows() > max_rows
        {
            bail!(
                ErrorKind::LoadQuotaExceeded,
                "Load exceeds the row quota of the destination",
                format!("{} rows staged, at most {max_rows} allowed", load.rows())
            );
        }

        let mut rows = Vec::with_capacity(load.rows());
        for batch in load.batches() {
            let data = staging.read(&batch.key).await?;
            for record in decode_batch(schema, &data)? {
                validate_required_fields(schema, &record)?;
                rows.push(record);
            }
        }

        let written = rows.len() as u64;
        match mode {
            LoadMode::Append => memory_table.rows.extend(rows),
            LoadMode::Truncate => memory_table.rows = rows,
        }
        inner.commits += 1;

        info!(%table, %mode, rows = written, "committed load into memory warehouse");

        Ok(written)
    }
}
