use config::shared::{KmsConfig, LoaderConfig, MemoryFieldConfig, WarehouseConfig};
use etl::error::{ErrorKind, EtlResult};
use etl::load::staging::StagingStore;
use etl::load::staging::fs::FsStagingStore;
use etl::load::warehouse::Warehouse;
use etl::load::warehouse::memory::MemoryWarehouse;
use etl::pipeline::{LoadSummary, Pipeline, RunId};
use etl::secret::kms::{CloudKms, KeyManagementService, LocalKms};
use etl::source::{DriverPolicy, DriverRegistry};
use etl::types::{DestinationTable, FieldMode, FieldSchema, FieldType, TableSchema};
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(feature = "bigquery")]
use etl::load::warehouse::bigquery::{BigQueryWarehouse, install_crypto_provider};
#[cfg(feature = "bigquery")]
use secrecy::ExposeSecret;

/// Builds every collaborator from `loader_config` and runs the job once.
pub async fn start_loader_with_config(
    loader_config: LoaderConfig,
    run_id: RunId,
) -> EtlResult<LoadSummary> {
    info!(
        driver = %loader_config.pipeline.driver_class_name,
        driver_jars = ?loader_config.pipeline.driver_jars,
        output_table = %loader_config.pipeline.output_table,
        "starting loader"
    );

    let kms = loader_config.kms.as_ref().map(init_kms).transpose()?;
    let staging = FsStagingStore::from_location(&loader_config.pipeline.staging_directory)?;
    let registry = DriverRegistry::with_builtin_drivers(DriverPolicy::from(&loader_config.drivers));

    // Static dispatch over the warehouse, at the cost of one arm per backend.
    match &loader_config.warehouse {
        WarehouseConfig::Memory { fields } => {
            let table = DestinationTable::parse(&loader_config.pipeline.output_table)?;
            let warehouse = MemoryWarehouse::new();
            warehouse
                .create_table(table.clone(), memory_table_schema(fields)?)
                .await;
            warn!(%table, "loading into the in-memory warehouse, rows are discarded on exit");

            run_pipeline(loader_config, run_id, kms, registry, warehouse, staging).await
        }
        #[cfg(feature = "bigquery")]
        WarehouseConfig::BigQuery {
            project_id,
            service_account_key,
        } => {
            install_crypto_provider();
            let warehouse = BigQueryWarehouse::new_with_key(
                project_id.clone(),
                service_account_key.expose_secret(),
            )
            .await?;

            run_pipeline(loader_config, run_id, kms, registry, warehouse, staging).await
        }
        #[cfg(not(feature = "bigquery"))]
        WarehouseConfig::BigQuery { .. } => {
            etl::bail!(
                ErrorKind::ConfigError,
                "BigQuery support is not compiled into this loader",
                "rebuild with the `bigquery` feature"
            );
        }
    }
}

/// Builds the schema of the output table created in the in-memory warehouse.
fn memory_table_schema(fields: &[MemoryFieldConfig]) -> EtlResult<TableSchema> {
    let fields = fields
        .iter()
        .map(|field| {
            let Some(field_type) = FieldType::from_type_name(&field.field_type) else {
                etl::bail!(
                    ErrorKind::ConfigError,
                    "Unknown field type for the in-memory warehouse",
                    format!("field `{}` has type `{}`", field.name, field.field_type)
                );
            };
            let mode = if field.required {
                FieldMode::Required
            } else {
                FieldMode::Nullable
            };

            Ok(FieldSchema::new(field.name.clone(), field_type, mode))
        })
        .collect::<EtlResult<Vec<_>>>()?;

    Ok(TableSchema::new(fields))
}

fn init_kms(config: &KmsConfig) -> EtlResult<Arc<dyn KeyManagementService>> {
    let kms: Arc<dyn KeyManagementService> = match config {
        KmsConfig::Local { keys } => Arc::new(LocalKms::from_config(keys)?),
        KmsConfig::Cloud {
            base_url,
            access_token,
        } => Arc::new(CloudKms::new(base_url.clone(), access_token.clone())),
    };
    info!(kms = kms.name(), "initialized key management service");

    Ok(kms)
}

async fn run_pipeline<W, S>(
    loader_config: LoaderConfig,
    run_id: RunId,
    kms: Option<Arc<dyn KeyManagementService>>,
    registry: DriverRegistry,
    warehouse: W,
    staging: S,
) -> EtlResult<LoadSummary>
where
    W: Warehouse + 'static,
    S: StagingStore + 'static,
{
    let mut pipeline = Pipeline::new(loader_config.pipeline, registry, warehouse, staging)
        .with_batch_config(loader_config.batch)
        .with_staging_config(loader_config.staging);
    if let Some(kms) = kms {
        pipeline = pipeline.with_kms(kms);
    }

    // Spawn a task to listen for Ctrl+C and cancel the run.
    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {err:?}");
            return;
        }

        info!("ctrl+c received, cancelling load run");
        if let Err(err) = shutdown_tx.shutdown() {
            warn!("failed to send shutdown signal: {err:?}");
        }
    });

    let result = pipeline.run_with_id(run_id).await;

    // The run may have finished before ctrl+c, in which case the listener is still waiting.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    if let Err(err) = &result
        && err.kind() == ErrorKind::PipelineCancelled
    {
        warn!("load run cancelled, destination table left untouched");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: &str, required: bool) -> MemoryFieldConfig {
        MemoryFieldConfig {
            name: name.to_owned(),
            field_type: field_type.to_owned(),
            required,
        }
    }

    #[test]
    fn memory_schema_follows_configured_fields() {
        let schema = memory_table_schema(&[
            field("id", "INT64", true),
            field("full_name", "string", false),
        ])
        .unwrap();

        assert_eq!(
            schema,
            TableSchema::new(vec![
                FieldSchema::required("id", FieldType::Int64),
                FieldSchema::nullable("full_name", FieldType::String),
            ])
        );
    }

    #[test]
    fn unknown_memory_field_types_are_config_errors() {
        let err = memory_table_schema(&[field("price", "NUMERIC", false)]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(err.detail().unwrap().contains("`price`"));
    }
}
