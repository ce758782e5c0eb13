use config::shared::{BatchConfig, PipelineConfig, StagingConfig};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::concurrency::shutdown::{
    ShutdownResult, ShutdownRx, ShutdownTx, create_shutdown_channel, is_shutdown_requested,
};
use crate::concurrency::stream::BatchStream;
use crate::error::{ErrorKind, EtlResult};
use crate::{bail, etl_error};
use crate::load::staging::StagingStore;
use crate::load::warehouse::Warehouse;
use crate::load::{LoadBatch, LoadCoordinator, LoadMode};
use crate::schema::SchemaMapper;
use crate::secret::SecretResolver;
use crate::secret::kms::KeyManagementService;
use crate::source::{ConnectionConfig, DriverRegistry, QueryExtractor};
use crate::types::DestinationTable;

/// Identifier of a single execution of a pipeline.
pub type RunId = String;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub run_id: RunId,
    pub rows: u64,
    pub batches: usize,
    pub mode: LoadMode,
}

/// A single bounded load job from a JDBC source into a warehouse table.
///
/// A pipeline runs once. Cancellation is requested through the handle returned by
/// [`Pipeline::shutdown_tx`]. A cancellation sent before the run starts is kept and makes the run
/// stop before it opens the source connection.
#[derive(Debug)]
pub struct Pipeline<W, S> {
    config: Arc<PipelineConfig>,
    kms: Option<Arc<dyn KeyManagementService>>,
    registry: DriverRegistry,
    warehouse: W,
    staging: S,
    batch: BatchConfig,
    staging_config: StagingConfig,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

impl<W, S> Pipeline<W, S>
where
    W: Warehouse,
    S: StagingStore,
{
    pub fn new(config: PipelineConfig, registry: DriverRegistry, warehouse: W, staging: S) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            kms: None,
            registry,
            warehouse,
            staging,
            batch: BatchConfig::default(),
            staging_config: StagingConfig::default(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Sets the key management service used to decrypt credentials.
    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_staging_config(mut self, staging_config: StagingConfig) -> Self {
        self.staging_config = staging_config;
        self
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Runs the job to completion.
    ///
    /// The configuration, credentials, connection parameters and column types are all checked
    /// before any row is read. Rows are then extracted, mapped, staged and committed in one load.
    pub async fn run(self) -> EtlResult<LoadSummary> {
        self.run_with_id(Uuid::new_v4().to_string()).await
    }

    /// Runs the job under a caller supplied `run_id`, which also names its staging prefix.
    pub async fn run_with_id(self, run_id: RunId) -> EtlResult<LoadSummary> {
        let span = info_span!("load_run", run_id = %run_id);

        self.execute(run_id).instrument(span).await
    }

    async fn execute(self, run_id: RunId) -> EtlResult<LoadSummary> {
        // Clones keep the pending signal, unlike fresh subscriptions.
        let shutdown_rx = self.shutdown_rx;
        let batch_shutdown_rx = shutdown_rx.clone();

        let config = self.config;
        config.validate()?;

        let mode = LoadMode::from_truncate(config.truncate_before_write);
        let table = DestinationTable::parse(&config.output_table)?;
        info!(
            driver = %config.driver_class_name,
            %table,
            %mode,
            encrypted_credentials = config.has_encrypted_credentials(),
            "starting load run"
        );

        let connection = ConnectionConfig::new(&config, &self.registry)?;
        ensure_not_cancelled(&shutdown_rx)?;

        let secret_resolver = SecretResolver::new(config.kms_encryption_key.clone(), self.kms);
        let credentials = secret_resolver.resolve_credentials(&config).await?;

        let schema = self.warehouse.table_schema(&table).await?;
        let mapper = SchemaMapper::new(schema.clone());

        ensure_not_cancelled(&shutdown_rx)?;
        let connection = connection.open(credentials).await?;
        let rows = QueryExtractor::new(config.query.clone(), config.use_column_alias)
            .extract(connection)
            .await?;
        mapper.check_columns(rows.columns())?;

        let batches = BatchStream::wrap(rows, self.batch.max_size, batch_shutdown_rx)
            .enumerate()
            .map(|(index, batch)| match batch? {
                ShutdownResult::Ok(rows) => Ok(LoadBatch::new(index, mapper.map_rows(rows)?)),
                ShutdownResult::Shutdown(rows) => Err(etl_error!(
                    ErrorKind::PipelineCancelled,
                    "Load run was cancelled during extraction",
                    format!("{} extracted rows discarded", rows.len())
                )),
            });

        let coordinator = LoadCoordinator::new(
            self.warehouse,
            self.staging,
            table,
            schema,
            mode,
            self.staging_config.max_concurrent_writes,
        );
        let outcome = coordinator
            .load(&run_id, batches, &shutdown_rx)
            .await?;

        info!(rows = outcome.rows, batches = outcome.batches, "load run completed");

        Ok(LoadSummary {
            run_id,
            rows: outcome.rows,
            batches: outcome.batches,
            mode,
        })
    }
}

fn ensure_not_cancelled(shutdown_rx: &ShutdownRx) -> EtlResult<()> {
    if is_shutdown_requested(shutdown_rx) {
        bail!(
            ErrorKind::PipelineCancelled,
            "Load run was cancelled before extraction"
        );
    }

    Ok(())
}
