use std::future::Future;

use crate::error::EtlResult;

/// Storage holding staged batches until they are committed.
///
/// Keys are `/` separated paths relative to the store's root, such as `<run_id>/batch-0.json`.
/// Writes for distinct keys may run concurrently.
pub trait StagingStore: Send + Sync {
    /// Returns the name of the store.
    fn name() -> &'static str;

    /// Returns a human readable location for `key`, used in logs and error details.
    fn location(&self, key: &str) -> String;

    /// Writes `data` under `key`.
    ///
    /// Fails with [`crate::error::ErrorKind::LoadStagingIoFailed`] if `key` already exists.
    fn write_new(&self, key: &str, data: Vec<u8>) -> impl Future<Output = EtlResult<()>> + Send;

    /// Reads the data stored under `key`.
    fn read(&self, key: &str) -> impl Future<Output = EtlResult<Vec<u8>>> + Send;

    /// Deletes every key under `prefix` and returns how many were removed.
    ///
    /// Deleting a prefix with no keys succeeds.
    fn delete_prefix(&self, prefix: &str) -> impl Future<Output = EtlResult<usize>> + Send;
}
