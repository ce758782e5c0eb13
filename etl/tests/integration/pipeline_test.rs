use etl::error::ErrorKind;
use etl::load::LoadMode;
use etl::load::staging::memory::MemoryStagingStore;
use etl::load::warehouse::memory::MemoryWarehouse;
use etl::secret::kms::LocalKms;
use etl::source::memory::{MEMORY_DRIVER_CLASS_NAME, MemoryDriver, MemoryResultSet};
use etl::pipeline::Pipeline;
use etl::source::{DriverPolicy, DriverRegistry};
use etl::test_utils::pipeline::{
    TEST_CONNECTION_URL, create_pipeline, create_pipeline_with_batch_size, test_pipeline_config,
};
use etl::test_utils::table::{
    USERS_OUTPUT_TABLE, USERS_QUERY, create_users_table, user_record, users_result_set,
};
use etl::types::{Cell, ColumnMetadata};
use secrecy::ExposeSecret;
use std::sync::Arc;
use telemetry::init_test_tracing;

const KEY_NAME: &str = "projects/test-project/locations/global/keyRings/loader/cryptoKeys/jdbc";

#[tokio::test]
async fn query_results_are_appended_under_their_aliases() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A"), (2, "B")]))
        .await;
    let table = create_users_table(&warehouse).await;

    let config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    let summary = create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.rows, 2);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.mode, LoadMode::Append);
    assert_eq!(
        warehouse.rows(&table).await.unwrap(),
        vec![
            user_record(1, "full_name", "A"),
            user_record(2, "full_name", "B"),
        ]
    );
    assert!(staging.is_empty().await);

    let connections = driver.connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].url.expose_secret(), TEST_CONNECTION_URL);
    assert_eq!(
        connections[0].username.as_ref().unwrap().expose_secret(),
        "loader"
    );
    assert_eq!(driver.executed_queries().await, vec![USERS_QUERY]);
}

#[tokio::test]
async fn underlying_column_names_are_used_without_aliases() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A")]))
        .await;
    let table = create_users_table(&warehouse).await;

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.use_column_alias = false;
    create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap();

    assert_eq!(
        warehouse.rows(&table).await.unwrap(),
        vec![user_record(1, "name", "A")]
    );
}

#[tokio::test]
async fn repeated_appends_accumulate_and_truncate_replaces() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A"), (2, "B"), (3, "C")]))
        .await;
    let table = create_users_table(&warehouse).await;

    for _ in 0..2 {
        let config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
        create_pipeline_with_batch_size(config, &driver, &warehouse, &staging, 2)
            .run()
            .await
            .unwrap();
    }
    assert_eq!(warehouse.rows(&table).await.unwrap().len(), 6);

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.truncate_before_write = true;
    let summary = create_pipeline_with_batch_size(config, &driver, &warehouse, &staging, 2)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.mode, LoadMode::Truncate);
    assert_eq!(summary.batches, 2);
    assert_eq!(
        warehouse.rows(&table).await.unwrap(),
        vec![
            user_record(1, "full_name", "A"),
            user_record(2, "full_name", "B"),
            user_record(3, "full_name", "C"),
        ]
    );
    assert_eq!(warehouse.commits().await, 3);
    assert!(staging.is_empty().await);
}

#[tokio::test]
async fn encrypted_credentials_are_decrypted_before_connecting() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A")]))
        .await;
    let table = create_users_table(&warehouse).await;

    let kms = LocalKms::new().with_random_key(KEY_NAME).unwrap();
    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.kms_encryption_key = Some(KEY_NAME.to_owned());
    config.connection_url = kms
        .encrypt_to_base64(KEY_NAME, TEST_CONNECTION_URL)
        .unwrap()
        .into();
    config.username = Some(kms.encrypt_to_base64(KEY_NAME, "loader").unwrap().into());
    config.password = Some(kms.encrypt_to_base64(KEY_NAME, "s3cret").unwrap().into());

    create_pipeline(config, &driver, &warehouse, &staging)
        .with_kms(Arc::new(kms))
        .run()
        .await
        .unwrap();

    let connections = driver.connections().await;
    assert_eq!(connections[0].url.expose_secret(), TEST_CONNECTION_URL);
    assert_eq!(
        connections[0].password.as_ref().unwrap().expose_secret(),
        "s3cret"
    );
    assert_eq!(warehouse.rows(&table).await.unwrap().len(), 1);
}

#[tokio::test]
async fn ciphertext_under_an_unknown_key_fails_before_connecting() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();
    create_users_table(&warehouse).await;

    let encrypting_kms = LocalKms::new().with_random_key(KEY_NAME).unwrap();
    let other_kms = LocalKms::new().with_random_key(KEY_NAME).unwrap();
    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.kms_encryption_key = Some(KEY_NAME.to_owned());
    config.connection_url = encrypting_kms
        .encrypt_to_base64(KEY_NAME, TEST_CONNECTION_URL)
        .unwrap()
        .into();
    config.username = None;
    config.password = None;

    let err = create_pipeline(config, &driver, &warehouse, &staging)
        .with_kms(Arc::new(other_kms))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CredentialDecryptionFailed);
    assert!(driver.connections().await.is_empty());
}

#[tokio::test]
async fn malformed_properties_fail_before_connecting() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();
    create_users_table(&warehouse).await;

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.connection_properties = Some("useSSL=false;autoReconnect".to_owned());

    let err = create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedProperties);
    assert!(driver.connections().await.is_empty());
}

#[tokio::test]
async fn malformed_properties_fail_before_credentials_are_decrypted() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();
    create_users_table(&warehouse).await;

    let kms = LocalKms::new().with_random_key(KEY_NAME).unwrap();
    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.kms_encryption_key = Some(KEY_NAME.to_owned());
    config.connection_url = kms
        .encrypt_to_base64(KEY_NAME, TEST_CONNECTION_URL)
        .unwrap()
        .into();
    config.username = None;
    config.password = None;
    config.connection_properties = Some("useSSL=false;autoReconnect".to_owned());

    // No key-management service is wired, so reaching decryption would fail differently.
    let err = create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedProperties);
}

#[tokio::test]
async fn properties_are_handed_to_the_driver() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A")]))
        .await;
    create_users_table(&warehouse).await;

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.connection_properties = Some("useSSL=false;connectTimeout=10;".to_owned());
    create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap();

    let connections = driver.connections().await;
    assert_eq!(connections[0].property("useSSL"), Some("false"));
    assert_eq!(connections[0].property("connectTimeout"), Some("10"));
}

#[tokio::test]
async fn denied_drivers_are_rejected() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();
    create_users_table(&warehouse).await;

    let policy = DriverPolicy::new(Vec::new(), vec![MEMORY_DRIVER_CLASS_NAME.to_owned()]);
    let registry = DriverRegistry::new(policy).with_driver(driver.clone());
    let config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);

    let err = Pipeline::new(config, registry, warehouse.clone(), staging.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DriverNotAllowed);
    assert!(driver.connections().await.is_empty());
}

#[tokio::test]
async fn unsupported_column_types_fail_before_staging() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    let query = "select id, price from users";
    driver
        .add_result_set(
            query,
            MemoryResultSet::new(vec![
                ColumnMetadata::new("id", "id", "BIGINT"),
                ColumnMetadata::new("price", "price", "NUMERIC"),
            ]),
        )
        .await;
    let table = create_users_table(&warehouse).await;

    let err = create_pipeline(
        test_pipeline_config(query, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedType);
    assert!(warehouse.rows(&table).await.unwrap().is_empty());
    assert_eq!(warehouse.commits().await, 0);
}

#[tokio::test]
async fn incompatible_columns_fail_before_staging() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    let query = "select name as id from users";
    driver
        .add_result_set(
            query,
            MemoryResultSet::new(vec![ColumnMetadata::new("id", "name", "VARCHAR")])
                .with_row(vec![Cell::Text("A".to_owned())]),
        )
        .await;
    create_users_table(&warehouse).await;

    let err = create_pipeline(
        test_pipeline_config(query, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    assert_eq!(warehouse.commits().await, 0);
    assert!(staging.is_empty().await);
}

#[tokio::test]
async fn missing_destination_table_fails_before_connecting() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    let err = create_pipeline(
        test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationTableMissing);
    assert!(driver.connections().await.is_empty());
}

#[tokio::test]
async fn extraction_failure_leaves_the_table_untouched() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(
            USERS_QUERY,
            users_result_set(&[(1, "A"), (2, "B"), (3, "C")]).failing_after(2),
        )
        .await;
    let table = create_users_table(&warehouse).await;
    warehouse
        .insert_rows(&table, vec![user_record(0, "full_name", "existing")])
        .await
        .unwrap();

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.truncate_before_write = true;
    let err = create_pipeline_with_batch_size(config, &driver, &warehouse, &staging, 1)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert_eq!(
        warehouse.rows(&table).await.unwrap(),
        vec![user_record(0, "full_name", "existing")]
    );
    assert_eq!(warehouse.commits().await, 0);
    assert!(staging.is_empty().await);
}

#[tokio::test]
async fn quota_failures_are_load_errors() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A"), (2, "B")]))
        .await;
    let table = create_users_table(&warehouse).await;
    warehouse.set_max_rows_per_load(1).await;

    let err = create_pipeline(
        test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LoadQuotaExceeded);
    assert!(err.kind().is_load_error());
    assert!(warehouse.rows(&table).await.unwrap().is_empty());
    assert!(staging.is_empty().await);
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.output_table = "users".to_owned();

    let err = create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test]
async fn cancellation_before_the_run_prevents_any_load() {
    init_test_tracing();
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A"), (2, "B")]))
        .await;
    let table = create_users_table(&warehouse).await;

    let config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    let pipeline = create_pipeline(config, &driver, &warehouse, &staging);
    pipeline.shutdown_tx().shutdown().unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PipelineCancelled);
    assert_eq!(warehouse.commits().await, 0);
    assert!(warehouse.rows(&table).await.unwrap().is_empty());
    assert!(staging.is_empty().await);
    assert!(driver.connections().await.is_empty());
}
