use config::Environment;
use config::shared::LoaderConfig;
use etl::error::EtlError;
use secrecy::ExposeSecret;
use sentry::protocol::{Event, Exception, Stacktrace};
use sentry::types::Uuid;
use std::backtrace::BacktraceStatus;
use std::sync::Arc;
use tracing::info;

use crate::APP_VERSION_ENV_NAME;

/// Initializes Sentry error tracking for the loader.
///
/// Returns [`None`] when no Sentry configuration is present, so the loader runs without error
/// tracking.
pub fn init(config: &LoaderConfig) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let Some(sentry_config) = &config.sentry else {
        info!("sentry not configured for loader, skipping initialization");

        return Ok(None);
    };

    info!("initializing sentry with supplied dsn");

    let environment = Environment::load()?;
    let dsn = sentry_config.dsn.expose_secret().parse()?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        environment: Some(environment.to_string().into()),
        integrations: vec![Arc::new(
            sentry::integrations::panic::PanicIntegration::new(),
        )],
        attach_stacktrace: true,
        ..Default::default()
    });

    let version = std::env::var(APP_VERSION_ENV_NAME);
    sentry::configure_scope(|scope| {
        scope.set_tag("service", "loader");
        scope.set_tag("output_table", &config.pipeline.output_table);
        if let Ok(version) = version {
            scope.set_tag("version", version);
        }
    });

    Ok(Some(guard))
}

/// Captures a failed run to Sentry and returns the event id.
pub fn capture_error(err: &EtlError) -> Uuid {
    sentry::capture_event(event_from_etl_error(err))
}

/// Builds an event with one exception per failure, typed by its [`etl::error::ErrorKind`].
fn event_from_etl_error(err: &EtlError) -> Event<'static> {
    let mut exceptions = Vec::new();
    collect_exceptions(err, &mut exceptions);

    if let Some(stacktrace) = find_first_captured_backtrace(err)
        && let Some(exception) = exceptions.first_mut()
    {
        exception.stacktrace = Some(stacktrace);
    }

    Event {
        exception: exceptions.into(),
        level: sentry::Level::Error,
        ..Default::default()
    }
}

/// Aggregated errors are parallel failures, so they are kept in their original order.
fn collect_exceptions(err: &EtlError, exceptions: &mut Vec<Exception>) {
    match err.errors() {
        Some(errors) => {
            for err in errors {
                collect_exceptions(err, exceptions);
            }
        }
        None => exceptions.push(Exception {
            ty: format!("{:?}", err.kind()),
            value: Some(err.to_string()),
            ..Default::default()
        }),
    }
}

fn find_first_captured_backtrace(err: &EtlError) -> Option<Stacktrace> {
    let backtrace = match err.errors() {
        Some(errors) => errors.iter().find_map(EtlError::backtrace)?,
        None => err.backtrace()?,
    };
    if backtrace.status() != BacktraceStatus::Captured {
        return None;
    }

    sentry::integrations::backtrace::parse_stacktrace(&backtrace.to_string())
}
