use etl::error::ErrorKind;
use etl::failpoints::{LOAD_AFTER_STAGING_FP, LOAD_BEFORE_CLEANUP_FP, LOAD_BEFORE_COMMIT_FP};
use etl::load::staging::memory::MemoryStagingStore;
use etl::load::warehouse::memory::MemoryWarehouse;
use etl::source::memory::MemoryDriver;
use etl::test_utils::failpoints::CustomFailScenario;
use etl::test_utils::pipeline::{create_pipeline, test_pipeline_config};
use etl::test_utils::table::{
    USERS_OUTPUT_TABLE, USERS_QUERY, create_users_table, user_record, users_result_set,
};
use etl::types::DestinationTable;
use std::time::Duration;
use telemetry::init_test_tracing;

async fn seeded_components() -> (
    MemoryDriver,
    MemoryWarehouse,
    MemoryStagingStore,
    DestinationTable,
) {
    let driver = MemoryDriver::new();
    let warehouse = MemoryWarehouse::new();
    let staging = MemoryStagingStore::new();

    driver
        .add_result_set(USERS_QUERY, users_result_set(&[(1, "A"), (2, "B")]))
        .await;
    let table = create_users_table(&warehouse).await;
    warehouse
        .insert_rows(&table, vec![user_record(0, "full_name", "existing")])
        .await
        .unwrap();

    (driver, warehouse, staging, table)
}

#[tokio::test]
async fn failed_commit_leaves_the_table_untouched_and_staging_empty() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(LOAD_BEFORE_COMMIT_FP, "return(quota)")]);
    let (driver, warehouse, staging, table) = seeded_components().await;

    let mut config = test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE);
    config.truncate_before_write = true;
    let err = create_pipeline(config, &driver, &warehouse, &staging)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LoadQuotaExceeded);
    assert_eq!(
        warehouse.rows(&table).await.unwrap(),
        vec![user_record(0, "full_name", "existing")]
    );
    assert_eq!(warehouse.commits().await, 0);
    assert!(staging.is_empty().await);
}

#[tokio::test]
async fn failure_after_staging_is_a_commit_failure() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(LOAD_AFTER_STAGING_FP, "return")]);
    let (driver, warehouse, staging, table) = seeded_components().await;

    let err = create_pipeline(
        test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LoadCommitFailed);
    assert!(err.kind().is_load_error());
    assert_eq!(warehouse.rows(&table).await.unwrap().len(), 1);
    assert!(staging.is_empty().await);
}

#[tokio::test]
async fn failed_cleanup_fails_a_committed_run() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[(LOAD_BEFORE_CLEANUP_FP, "return(staging_io)")]);
    let (driver, warehouse, staging, table) = seeded_components().await;

    let err = create_pipeline(
        test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StagingCleanupFailed);
    assert_eq!(warehouse.rows(&table).await.unwrap().len(), 3);
    assert!(!staging.is_empty().await);
}

#[tokio::test]
async fn commit_and_cleanup_failures_are_both_reported() {
    init_test_tracing();
    let _scenario = CustomFailScenario::setup(&[
        (LOAD_BEFORE_COMMIT_FP, "return(schema)"),
        (LOAD_BEFORE_CLEANUP_FP, "return(staging_io)"),
    ]);
    let (driver, warehouse, staging, table) = seeded_components().await;

    let err = create_pipeline(
        test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    )
    .run()
    .await
    .unwrap_err();

    let kinds = err.kinds();
    assert!(kinds.contains(&ErrorKind::LoadSchemaValidationFailed));
    assert!(kinds.contains(&ErrorKind::StagingCleanupFailed));
    assert_eq!(warehouse.rows(&table).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_after_staging_prevents_the_commit() {
    init_test_tracing();
    let scenario = CustomFailScenario::setup(&[(LOAD_AFTER_STAGING_FP, "pause")]);
    let (driver, warehouse, staging, table) = seeded_components().await;

    let pipeline = create_pipeline(
        test_pipeline_config(USERS_QUERY, USERS_OUTPUT_TABLE),
        &driver,
        &warehouse,
        &staging,
    );
    let shutdown_tx = pipeline.shutdown_tx();
    let run = tokio::spawn(pipeline.run());

    // Staged files only appear once the run has subscribed to cancellation.
    tokio::time::timeout(Duration::from_secs(10), async {
        while staging.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.shutdown().unwrap();
    scenario.teardown();

    let err = run.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PipelineCancelled);
    assert_eq!(
        warehouse.rows(&table).await.unwrap(),
        vec![user_record(0, "full_name", "existing")]
    );
    assert!(staging.is_empty().await);
}
