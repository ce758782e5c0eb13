//! Shorthands for building [`crate::error::EtlError`] values.

/// Builds an [`crate::error::EtlError`] from a kind and a static description.
///
/// Dynamic context goes in the optional third argument: either any [`ToString`] value, or
/// `detail = <String>` to move an owned string in without copying. A trailing `source: <error>`
/// attaches the underlying error.
///
/// ```ignore
/// etl_error!(ErrorKind::UnsupportedType, "Unsupported column type", format!("{column}: {sql_type}"));
/// etl_error!(ErrorKind::LoadStagingIoFailed, "Staging write failed", path.display(), source: err);
/// ```
#[macro_export]
macro_rules! etl_error {
    ($kind:expr, $desc:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with an [`crate::error::EtlError`] built by [`etl_error!`].
///
/// Accepts exactly the same arguments as [`etl_error!`].
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::etl_error!($($args)+))
    };
}
