use config::shared::{BatchConfig, PipelineConfig};

use crate::load::staging::memory::MemoryStagingStore;
use crate::load::warehouse::memory::MemoryWarehouse;
use crate::pipeline::Pipeline;
use crate::source::memory::{MEMORY_DRIVER_CLASS_NAME, MemoryDriver};
use crate::source::{DriverPolicy, DriverRegistry};

/// Connection URL accepted by [`MemoryDriver`].
pub const TEST_CONNECTION_URL: &str = "jdbc:mysql://localhost:3306/test_db";

/// Driver archive location used by test configurations.
pub const TEST_DRIVER_JAR: &str = "gs://test-drivers/memory-driver.jar";

/// Returns a plaintext, appending configuration that reads `query` through [`MemoryDriver`].
pub fn test_pipeline_config(query: &str, output_table: &str) -> PipelineConfig {
    PipelineConfig {
        driver_jars: vec![TEST_DRIVER_JAR.to_owned()],
        driver_class_name: MEMORY_DRIVER_CLASS_NAME.to_owned(),
        connection_url: TEST_CONNECTION_URL.into(),
        connection_properties: None,
        username: Some("loader".into()),
        password: Some("loader-password".into()),
        query: query.to_owned(),
        output_table: output_table.to_owned(),
        staging_directory: "/tmp/etl-staging".to_owned(),
        kms_encryption_key: None,
        use_column_alias: true,
        truncate_before_write: false,
    }
}

/// Creates a pipeline wired to the given in-memory components.
///
/// Clones of `driver`, `warehouse` and `staging` share state with the ones handed to the
/// pipeline, so tests keep them around to seed data and inspect the outcome.
pub fn create_pipeline(
    config: PipelineConfig,
    driver: &MemoryDriver,
    warehouse: &MemoryWarehouse,
    staging: &MemoryStagingStore,
) -> Pipeline<MemoryWarehouse, MemoryStagingStore> {
    let registry = DriverRegistry::new(DriverPolicy::permissive()).with_driver(driver.clone());

    Pipeline::new(config, registry, warehouse.clone(), staging.clone())
}

/// Like [`create_pipeline`] but staging batches of at most `max_size` records.
pub fn create_pipeline_with_batch_size(
    config: PipelineConfig,
    driver: &MemoryDriver,
    warehouse: &MemoryWarehouse,
    staging: &MemoryStagingStore,
    max_size: usize,
) -> Pipeline<MemoryWarehouse, MemoryStagingStore> {
    create_pipeline(config, driver, warehouse, staging).with_batch_config(BatchConfig { max_size })
}
