use secrecy::SecretString;
use serde::Deserialize;

/// Sentry error tracking configuration.
///
/// Contains the DSN required to initialize Sentry for error reporting in the loader.
#[derive(Debug, Clone, Deserialize)]
pub struct SentryConfig {
    /// Sentry DSN (Data Source Name) for error reporting.
    pub dsn: SecretString,
}
