use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

pub const LOAD_AFTER_STAGING_FP: &str = "load.after_staging";
pub const LOAD_BEFORE_COMMIT_FP: &str = "load.before_commit";
pub const LOAD_BEFORE_CLEANUP_FP: &str = "load.before_cleanup";

/// Fails with an error when the failpoint `name` is configured to return.
///
/// The failpoint parameter picks the error kind: `quota`, `schema`, `staging_io` or `commit`.
/// Any other or missing parameter yields [`ErrorKind::LoadCommitFailed`].
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("quota") => ErrorKind::LoadQuotaExceeded,
            Some("schema") => ErrorKind::LoadSchemaValidationFailed,
            Some("staging_io") => ErrorKind::LoadStagingIoFailed,
            _ => ErrorKind::LoadCommitFailed,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
