use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::load::staging::StagingStore;

/// In-memory staging store for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemoryStagingStore {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the keys currently stored, in order.
    pub async fn keys(&self) -> Vec<String> {
        self.files.lock().await.keys().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.lock().await.is_empty()
    }
}

fn is_under_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');

    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl StagingStore for MemoryStagingStore {
    fn name() -> &'static str {
        "memory"
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{key}")
    }

    async fn write_new(&self, key: &str, data: Vec<u8>) -> EtlResult<()> {
        let mut files = self.files.lock().await;
        if files.contains_key(key) {
            bail!(
                ErrorKind::LoadStagingIoFailed,
                "Staging file already exists",
                self.location(key)
            );
        }

        files.insert(key.to_owned(), data);

        Ok(())
    }

    async fn read(&self, key: &str) -> EtlResult<Vec<u8>> {
        let files = self.files.lock().await;
        let Some(data) = files.get(key) else {
            bail!(
                ErrorKind::LoadStagingIoFailed,
                "Staging file does not exist",
                self.location(key)
            );
        };

        Ok(data.clone())
    }

    async fn delete_prefix(&self, prefix: &str) -> EtlResult<usize> {
        let mut files = self.files.lock().await;
        let before = files.len();
        files.retain(|key, _| !is_under_prefix(key, prefix));

        Ok(before - files.len())
    }
}
