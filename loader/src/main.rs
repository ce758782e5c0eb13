//! Loader binary.
//!
//! Runs a single JDBC to warehouse load job described by the `configuration` directory and
//! `APP_` environment variables, then exits. A failed run exits with a non-zero status.

use ::config::shared::LoaderConfig;
use telemetry::init_tracing_with_run_id;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::load_loader_config;
use crate::core::start_loader_with_config;

mod config;
mod core;
mod sentry;

/// The name of the environment variable which contains version information for this loader.
const APP_VERSION_ENV_NAME: &str = "APP_VERSION";

fn main() -> anyhow::Result<()> {
    let loader_config = load_loader_config()?;

    // The run id tags every log line and names the staging prefix of this run.
    let run_id = Uuid::new_v4().to_string();
    let _log_flusher = init_tracing_with_run_id(env!("CARGO_BIN_NAME"), Some(run_id.clone()))?;

    // Initialize Sentry before the async runtime starts
    let _sentry_guard = sentry::init(&loader_config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(loader_config, run_id))
}

async fn async_main(loader_config: LoaderConfig, run_id: String) -> anyhow::Result<()> {
    match start_loader_with_config(loader_config, run_id).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                rows = summary.rows,
                batches = summary.batches,
                mode = %summary.mode,
                "load finished"
            );

            Ok(())
        }
        Err(err) => {
            sentry::capture_error(&err);
            error!("{err}");

            Err(err.into())
        }
    }
}
