use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::pin::pin;
use tracing::{debug, error, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::failpoints::{
    LOAD_AFTER_STAGING_FP, LOAD_BEFORE_CLEANUP_FP, LOAD_BEFORE_COMMIT_FP, etl_fail_point,
};
use crate::load::staging::StagingStore;
use crate::load::warehouse::Warehouse;
use crate::load::{LoadBatch, LoadMode, StagedBatch, StagedLoad, encode_batch};
use crate::types::{DestinationTable, TableSchema};

/// Result of a committed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub rows: u64,
    pub batches: usize,
}

/// Stages the batches of one run and commits them into the destination table.
///
/// Batches are written to `<run_id>/batch-<n>.json` in the staging store, with up to
/// `max_concurrent_writes` writes in flight. Once every batch is staged, all of them are applied
/// in a single warehouse commit. The run's staging prefix is deleted afterwards whatever the
/// outcome, and a failed cleanup fails the run.
#[derive(Debug)]
pub struct LoadCoordinator<W, S> {
    warehouse: W,
    staging: S,
    table: DestinationTable,
    schema: TableSchema,
    mode: LoadMode,
    max_concurrent_writes: usize,
}

impl<W, S> LoadCoordinator<W, S>
where
    W: Warehouse,
    S: StagingStore,
{
    pub fn new(
        warehouse: W,
        staging: S,
        table: DestinationTable,
        schema: TableSchema,
        mode: LoadMode,
        max_concurrent_writes: usize,
    ) -> Self {
        Self {
            warehouse,
            staging,
            table,
            schema,
            mode,
            max_concurrent_writes: max_concurrent_writes.max(1),
        }
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Stages every batch of `batches` and commits them.
    ///
    /// An error from `batches` stops staging and aborts the run without a commit. Cancellation
    /// observed on `shutdown_rx` before the commit starts aborts the run with
    /// [`ErrorKind::PipelineCancelled`]. In every case the staging prefix of the run is deleted
    /// before returning.
    pub async fn load<B>(
        &self,
        run_id: &str,
        batches: B,
        shutdown_rx: &ShutdownRx,
    ) -> EtlResult<LoadOutcome>
    where
        B: Stream<Item = EtlResult<LoadBatch>> + Send,
    {
        let mut staged_load = StagedLoad::new(run_id);

        let mut errors = self.stage_all(&mut staged_load, batches).await;

        if errors.is_empty() {
            if let Err(err) = self.commit(&staged_load, shutdown_rx).await {
                errors.push(err);
            }
        }

        if let Err(err) = self.cleanup(&staged_load).await {
            errors.push(err);
        }

        match errors.len() {
            0 => Ok(LoadOutcome {
                rows: staged_load.rows() as u64,
                batches: staged_load.batches().len(),
            }),
            1 => Err(errors.remove(0)),
            _ => Err(EtlError::from(errors)),
        }
    }

    /// Pulls batches and writes them to staging until the source is exhausted or fails.
    ///
    /// Writes already in flight when an error occurs are awaited, so no staging file is created
    /// after the cleanup runs. Returns every error encountered.
    async fn stage_all<B>(&self, staged_load: &mut StagedLoad, batches: B) -> Vec<EtlError>
    where
        B: Stream<Item = EtlResult<LoadBatch>> + Send,
    {
        let mut batches = pin!(batches);
        let mut writes = FuturesUnordered::new();
        let mut errors = Vec::new();
        let mut source_done = false;

        loop {
            let can_pull = !source_done
                && errors.is_empty()
                && writes.len() < self.max_concurrent_writes;
            if !can_pull && writes.is_empty() {
                break;
            }

            tokio::select! {
                Some(result) = writes.next(), if !writes.is_empty() => match result {
                    Ok(staged_batch) => staged_load.push(staged_batch),
                    Err(err) => errors.push(err),
                },
                next = batches.next(), if can_pull => match next {
                    Some(Ok(batch)) => {
                        let key = staged_load.batch_key(batch.index());
                        writes.push(self.stage_batch(key, batch));
                    }
                    Some(Err(err)) => errors.push(err),
                    None => source_done = true,
                },
            }
        }

        if errors.is_empty() {
            info!(
                table = %self.table,
                batches = staged_load.batches().len(),
                rows = staged_load.rows(),
                "staged all batches"
            );
        }

        errors
    }

    async fn stage_batch(&self, key: String, batch: LoadBatch) -> EtlResult<StagedBatch> {
        let data = encode_batch(&self.schema, batch.records())?;

        self.staging.write_new(&key, data).await?;

        debug!(
            batch = batch.index(),
            rows = batch.len(),
            location = %self.staging.location(&key),
            "staged batch"
        );

        Ok(StagedBatch {
            index: batch.index(),
            key,
            rows: batch.len(),
        })
    }

    async fn commit(&self, staged_load: &StagedLoad, shutdown_rx: &ShutdownRx) -> EtlResult<()> {
        etl_fail_point(LOAD_AFTER_STAGING_FP)?;

        if is_shutdown_requested(shutdown_rx) {
            warn!(table = %self.table, "load cancelled before commit");

            return Err(etl_error!(
                ErrorKind::PipelineCancelled,
                "Load was cancelled before the commit",
                self.table
            ));
        }

        etl_fail_point(LOAD_BEFORE_COMMIT_FP)?;

        info!(
            table = %self.table,
            mode = %self.mode,
            batches = staged_load.batches().len(),
            "committing load"
        );

        let rows = self
            .warehouse
            .commit(
                &self.table,
                &self.schema,
                &self.staging,
                staged_load,
                self.mode,
            )
            .await
            .map_err(|err| {
                if err.kinds().iter().any(ErrorKind::is_load_error)
                    || err.kind() == ErrorKind::DestinationTableMissing
                {
                    err
                } else {
                    etl_error!(
                        ErrorKind::LoadCommitFailed,
                        "Warehouse commit failed",
                        self.table,
                        source: err
                    )
                }
            })?;

        info!(table = %self.table, rows, "load committed");

        Ok(())
    }

    async fn cleanup(&self, staged_load: &StagedLoad) -> EtlResult<()> {
        let result = match etl_fail_point(LOAD_BEFORE_CLEANUP_FP) {
            Ok(()) => self.staging.delete_prefix(staged_load.prefix()).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(deleted) => {
                debug!(run_id = staged_load.run_id(), deleted, "removed staging files");

                Ok(())
            }
            Err(err) => {
                error!(run_id = staged_load.run_id(), error = %err, "failed to remove staging files");

                Err(etl_error!(
                    ErrorKind::StagingCleanupFailed,
                    "Failed to remove staging files",
                    self.staging.location(staged_load.prefix()),
                    source: err
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::load::staging::memory::MemoryStagingStore;
    use crate::load::warehouse::memory::MemoryWarehouse;
    use crate::types::{Cell, DestinationRecord, FieldSchema, FieldType};

    fn users_table() -> (DestinationTable, TableSchema) {
        (
            DestinationTable::new(Some("p".to_owned()), "d", "users"),
            TableSchema::new(vec![
                FieldSchema::required("id", FieldType::Int64),
                FieldSchema::nullable("full_name", FieldType::String),
            ]),
        )
    }

    fn user(id: i64) -> DestinationRecord {
        DestinationRecord::from_iter([
            ("id", Cell::Integer(id)),
            ("full_name", Cell::from(format!("user {id}"))),
        ])
    }

    fn batches(ids: &[&[i64]]) -> Vec<EtlResult<LoadBatch>> {
        ids.iter()
            .enumerate()
            .map(|(index, ids)| Ok(LoadBatch::new(index, ids.iter().copied().map(user).collect())))
            .collect()
    }

    async fn coordinator(
        mode: LoadMode,
        seed: Vec<DestinationRecord>,
    ) -> (
        LoadCoordinator<MemoryWarehouse, MemoryStagingStore>,
        MemoryWarehouse,
        MemoryStagingStore,
    ) {
        let (table, schema) = users_table();
        let warehouse = MemoryWarehouse::new();
        let staging = MemoryStagingStore::new();
        warehouse.create_table(table.clone(), schema.clone()).await;
        warehouse.insert_rows(&table, seed).await.unwrap();

        let coordinator = LoadCoordinator::new(
            warehouse.clone(),
            staging.clone(),
            table,
            schema,
            mode,
            2,
        );

        (coordinator, warehouse, staging)
    }

    #[tokio::test]
    async fn truncate_leaves_only_rows_of_the_run() {
        let (coordinator, warehouse, staging) =
            coordinator(LoadMode::Truncate, vec![user(10), user(11)]).await;
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let outcome = coordinator
            .load("run-1", stream::iter(batches(&[&[1, 2], &[3]])), &shutdown_rx)
            .await
            .unwrap();

        assert_eq!(outcome, LoadOutcome { rows: 3, batches: 2 });
        let (table, _) = users_table();
        assert_eq!(
            warehouse.rows(&table).await.unwrap(),
            vec![user(1), user(2), user(3)]
        );
        assert!(staging.is_empty().await);
    }

    #[tokio::test]
    async fn append_adds_exactly_the_committed_rows() {
        let (coordinator, warehouse, staging) =
            coordinator(LoadMode::Append, vec![user(10)]).await;
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let outcome = coordinator
            .load("run-1", stream::iter(batches(&[&[1], &[2], &[3]])), &shutdown_rx)
            .await
            .unwrap();

        let (table, _) = users_table();
        let rows = warehouse.rows(&table).await.unwrap();
        assert_eq!(rows.len() as u64, 1 + outcome.rows);
        assert_eq!(rows, vec![user(10), user(1), user(2), user(3)]);
        assert!(staging.is_empty().await);
    }

    #[tokio::test]
    async fn source_errors_abort_without_commit_and_clean_up() {
        let (coordinator, warehouse, staging) =
            coordinator(LoadMode::Truncate, vec![user(10)]).await;
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let mut items = batches(&[&[1, 2]]);
        items.push(Err(etl_error!(
            ErrorKind::ExtractionFailed,
            "Connection dropped"
        )));

        let err = coordinator
            .load("run-1", stream::iter(items), &shutdown_rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
        let (table, _) = users_table();
        assert_eq!(warehouse.rows(&table).await.unwrap(), vec![user(10)]);
        assert_eq!(warehouse.commits().await, 0);
        assert!(staging.is_empty().await);
    }

    #[tokio::test]
    async fn cancellation_before_commit_prevents_the_commit() {
        let (coordinator, warehouse, staging) =
            coordinator(LoadMode::Truncate, vec![user(10)]).await;
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown().unwrap();

        let err = coordinator
            .load("run-1", stream::iter(batches(&[&[1]])), &shutdown_rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PipelineCancelled);
        assert_eq!(warehouse.commits().await, 0);
        assert!(staging.is_empty().await);
    }

    #[tokio::test]
    async fn failed_commit_keeps_the_table_and_cleans_up() {
        let (coordinator, warehouse, staging) =
            coordinator(LoadMode::Truncate, vec![user(10)]).await;
        warehouse.set_max_rows_per_load(1).await;
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let err = coordinator
            .load("run-1", stream::iter(batches(&[&[1, 2]])), &shutdown_rx)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LoadQuotaExceeded);
        let (table, _) = users_table();
        assert_eq!(warehouse.rows(&table).await.unwrap(), vec![user(10)]);
        assert!(staging.is_empty().await);
    }

    #[tokio::test]
    async fn an_empty_truncate_load_empties_the_table() {
        let (coordinator, warehouse, _staging) =
            coordinator(LoadMode::Truncate, vec![user(10)]).await;
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let outcome = coordinator
            .load("run-1", stream::iter(batches(&[])), &shutdown_rx)
            .await
            .unwrap();

        assert_eq!(outcome, LoadOutcome { rows: 0, batches: 0 });
        let (table, _) = users_table();
        assert!(warehouse.rows(&table).await.unwrap().is_empty());
    }
}
