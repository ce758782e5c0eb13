//! Error types and result definitions for ETL operations.
//!
//! Every failure of a load run is reported as an [`EtlError`] carrying an [`ErrorKind`], a static
//! description, optional dynamic detail (column, field, SQL type), an optional source error and the
//! location where it was raised. Multiple failures, such as a failed commit followed by a failed
//! staging cleanup, are aggregated into a single [`EtlError`].

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result of every fallible operation of a load run.
pub type EtlResult<T> = Result<T, EtlError>;

/// Metadata of a single failure.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error raised by any stage of a load run.
///
/// Either a single failure with its metadata or an ordered list of failures that happened in the
/// same run.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    ///
    /// Used when a run fails and its cleanup fails too, or when concurrent staging writes fail.
    Many {
        errors: Vec<EtlError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during a load run.
///
/// Every kind is terminal for the run: nothing is retried inside the loader, so callers decide
/// whether to re-run the job. Kinds are organized by the stage that raises them.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Credential Errors
    CredentialDecryptionFailed,

    // Connection Errors
    SourceConnectionFailed,
    MalformedProperties,
    DriverNotAllowed,
    DriverNotFound,

    // Extraction Errors
    UnsupportedType,
    ExtractionFailed,

    // Mapping Errors
    SchemaMismatch,
    DestinationTableMissing,

    // Load Errors
    LoadQuotaExceeded,
    LoadSchemaValidationFailed,
    LoadStagingIoFailed,
    LoadCommitFailed,
    StagingCleanupFailed,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // Workflow Errors
    PipelineCancelled,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for the kinds raised by the load step.
    ///
    /// These are the causes a failed load reports: quota, schema validation, staging I/O, the
    /// commit itself or the mandatory staging cleanup.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::LoadQuotaExceeded
                | ErrorKind::LoadSchemaValidationFailed
                | ErrorKind::LoadStagingIoFailed
                | ErrorKind::LoadCommitFailed
                | ErrorKind::StagingCleanupFailed
        )
    }
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    ///
    /// For single errors, returns a vector with one element. For multiple errors,
    /// returns a flattened vector of all error kinds.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    /// Returns [`None`] if no detailed information is available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => {
                // For multiple errors, return the detail of the first error that has one.
                errors.iter().find_map(|e| e.detail())
            }
        }
    }

    /// Returns the aggregated errors, or [`None`] for a single error.
    pub fn errors(&self) -> Option<&[EtlError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// The stored source is preserved across clones and exposed via [`error::Error::source`].
    /// Has no effect when called on aggregated errors because aggregates forward the first
    /// contained error as their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.set_source(Some(Arc::new(source)));
        self
    }

    /// Creates an [`EtlError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    /// Creates an [`EtlError`] that wraps `err`, using its message as detail.
    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }

    /// Sets the source for this [`EtlError`].
    fn set_source(&mut self, source: Option<Arc<dyn error::Error + Send + Sync>>) {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = source;
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(
                    f,
                    "[{:?}] {} @ {}",
                    payload.kind, payload.description, payload.location
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_block(f, "Detail", detail)?;
                }
                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write_block(f, "Backtrace", &payload.backtrace.to_string())?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {count} error{} aggregated @ {location}",
                    if count == 1 { "" } else { "s" }
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {}", line.trim_end())?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes `text` as an indented block headed by `title`.
fn write_block(f: &mut fmt::Formatter<'_>, title: &str, text: &str) -> fmt::Result {
    write!(f, "\n  {title}:")?;
    for line in text.lines() {
        write!(f, "\n    {}", line.trim_end())?;
    }

    Ok(())
}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates an [`EtlError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly without wrapping
/// it in the [`ErrorRepr::Many`] variant.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EtlError {
        let location = Location::caller();

        let mut errors: Vec<EtlError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        EtlError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`EtlError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax | serde_json::error::Category::Data => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
            serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        EtlError::from_source(kind, description, err)
    }
}

impl From<base64::DecodeError> for EtlError {
    #[track_caller]
    fn from(err: base64::DecodeError) -> EtlError {
        EtlError::from_source(ErrorKind::DeserializationError, "Base64 decoding failed", err)
    }
}

impl From<std::string::FromUtf8Error> for EtlError {
    #[track_caller]
    fn from(err: std::string::FromUtf8Error) -> EtlError {
        EtlError::from_source(
            ErrorKind::DeserializationError,
            "UTF-8 string conversion failed",
            err,
        )
    }
}

/// Converts [`aws_lc_rs::error::Unspecified`] to [`EtlError`] with
/// [`ErrorKind::CredentialDecryptionFailed`].
///
/// The error carries no detail on purpose, so neither does the converted error.
impl From<aws_lc_rs::error::Unspecified> for EtlError {
    #[track_caller]
    fn from(_: aws_lc_rs::error::Unspecified) -> EtlError {
        EtlError::from_components(
            ErrorKind::CredentialDecryptionFailed,
            Cow::Borrowed("Cryptographic operation failed"),
            None,
            None,
        )
    }
}

/// Converts [`reqwest::Error`] to [`EtlError`].
///
/// HTTP is only spoken to the key-management service, so transport and status failures are
/// reported as [`ErrorKind::CredentialDecryptionFailed`].
impl From<reqwest::Error> for EtlError {
    #[track_caller]
    fn from(err: reqwest::Error) -> EtlError {
        let description = match err.status() {
            Some(status) if status.is_client_error() => "Key management request was rejected",
            Some(_) => "Key management service returned an error",
            None if err.is_decode() => "Key management response could not be decoded",
            None => "Key management request failed",
        };

        EtlError::from_source(ErrorKind::CredentialDecryptionFailed, description, err)
    }
}

/// Converts [`config::shared::ValidationError`] to [`EtlError`] with [`ErrorKind::ConfigError`].
impl From<config::shared::ValidationError> for EtlError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> EtlError {
        EtlError::from_source(ErrorKind::ConfigError, "Pipeline configuration is invalid", err)
    }
}

impl From<tokio_postgres::Error> for EtlError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> EtlError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => {
                use tokio_postgres::error::SqlState;

                match *sqlstate {
                    // Connection errors (08xxx)
                    SqlState::CONNECTION_EXCEPTION
                    | SqlState::CONNECTION_DOES_NOT_EXIST
                    | SqlState::CONNECTION_FAILURE
                    | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                    | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION => (
                        ErrorKind::SourceConnectionFailed,
                        "PostgreSQL connection failed",
                    ),

                    // Authentication errors (28xxx)
                    SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                        ErrorKind::SourceConnectionFailed,
                        "PostgreSQL authentication failed",
                    ),

                    // Resource errors (53xxx)
                    SqlState::INSUFFICIENT_RESOURCES
                    | SqlState::OUT_OF_MEMORY
                    | SqlState::TOO_MANY_CONNECTIONS => (
                        ErrorKind::SourceConnectionFailed,
                        "PostgreSQL resource limitation",
                    ),

                    // Operator intervention errors (57xxx)
                    SqlState::ADMIN_SHUTDOWN
                    | SqlState::CRASH_SHUTDOWN
                    | SqlState::CANNOT_CONNECT_NOW => (
                        ErrorKind::SourceConnectionFailed,
                        "PostgreSQL server is unavailable",
                    ),
                    SqlState::QUERY_CANCELED => {
                        (ErrorKind::ExtractionFailed, "PostgreSQL query canceled")
                    }

                    // Syntax and access errors (42xxx)
                    SqlState::SYNTAX_ERROR
                    | SqlState::SYNTAX_ERROR_OR_ACCESS_RULE_VIOLATION
                    | SqlState::INSUFFICIENT_PRIVILEGE
                    | SqlState::UNDEFINED_TABLE
                    | SqlState::UNDEFINED_COLUMN => (
                        ErrorKind::ExtractionFailed,
                        "PostgreSQL rejected the source query",
                    ),

                    // Default for other SQL states
                    _ => (ErrorKind::ExtractionFailed, "PostgreSQL error"),
                }
            }
            // No SQL state means connection issue
            None => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        EtlError::from_source(kind, description, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, etl_error};

    fn failing_commit() -> EtlResult<()> {
        bail!(
            ErrorKind::LoadCommitFailed,
            "Commit failed",
            "table `p:d.t` was locked"
        );
    }

    #[test]
    fn single_error_carries_kind_and_detail() {
        let err = failing_commit().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LoadCommitFailed);
        assert_eq!(err.detail(), Some("table `p:d.t` was locked"));
        assert!(err.kind().is_load_error());
        assert!(err.to_string().contains("[LoadCommitFailed] Commit failed"));
    }

    #[test]
    fn aggregated_errors_expose_all_kinds() {
        let err = EtlError::from(vec![
            etl_error!(ErrorKind::LoadCommitFailed, "Commit failed"),
            etl_error!(ErrorKind::StagingCleanupFailed, "Cleanup failed"),
        ]);

        assert_eq!(err.kind(), ErrorKind::LoadCommitFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::LoadCommitFailed, ErrorKind::StagingCleanupFailed]
        );
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
        assert_eq!(err.errors().map(<[EtlError]>::len), Some(2));
    }

    #[test]
    fn single_element_vec_is_not_wrapped() {
        let err = EtlError::from(vec![etl_error!(
            ErrorKind::SchemaMismatch,
            "Incompatible types"
        )]);

        assert_eq!(err.kinds(), vec![ErrorKind::SchemaMismatch]);
        assert!(err.errors().is_none());
    }

    #[test]
    fn validation_errors_become_config_errors() {
        let err = EtlError::from(config::shared::ValidationError::MissingField("query"));

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(err.detail().unwrap().contains("query"));
    }

    #[test]
    fn non_load_kinds_are_not_load_errors() {
        assert!(!ErrorKind::ExtractionFailed.is_load_error());
        assert!(!ErrorKind::CredentialDecryptionFailed.is_load_error());
        assert!(ErrorKind::StagingCleanupFailed.is_load_error());
    }
}
