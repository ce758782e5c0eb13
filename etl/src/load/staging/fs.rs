use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::load::staging::StagingStore;
use crate::{bail, etl_error};

const FILE_SCHEME: &str = "file://";

/// Staging store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsStagingStore {
    root: PathBuf,
}

impl FsStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store for a configured staging location, which is either a path or a `file://`
    /// URL.
    pub fn from_location(location: &str) -> EtlResult<Self> {
        let path = location.strip_prefix(FILE_SCHEME).unwrap_or(location);
        if path.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Staging directory is empty",
                location
            );
        }

        if location.contains("://") && !location.starts_with(FILE_SCHEME) {
            bail!(
                ErrorKind::ConfigError,
                "Only local staging directories are supported",
                location
            );
        }

        Ok(Self::new(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` below the root, refusing keys that could escape it.
    fn resolve(&self, key: &str) -> EtlResult<PathBuf> {
        let relative = Path::new(key);
        let is_contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

        if key.is_empty() || !is_contained {
            bail!(
                ErrorKind::LoadStagingIoFailed,
                "Invalid staging key",
                key
            );
        }

        Ok(self.root.join(relative))
    }
}

fn staging_io_error(description: &'static str, path: &Path, err: io::Error) -> EtlError {
    etl_error!(
        ErrorKind::LoadStagingIoFailed,
        description,
        path.display(),
        source: err
    )
}

impl StagingStore for FsStagingStore {
    fn name() -> &'static str {
        "fs"
    }

    fn location(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }

    async fn write_new(&self, key: &str, data: Vec<u8>) -> EtlResult<()> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| staging_io_error("Failed to create staging directory", parent, err))?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|err| staging_io_error("Failed to create staging file", &path, err))?;

        file.write_all(&data)
            .await
            .map_err(|err| staging_io_error("Failed to write staging file", &path, err))?;
        file.sync_all()
            .await
            .map_err(|err| staging_io_error("Failed to flush staging file", &path, err))?;

        debug!(path = %path.display(), bytes = data.len(), "wrote staging file");

        Ok(())
    }

    async fn read(&self, key: &str) -> EtlResult<Vec<u8>> {
        let path = self.resolve(key)?;

        fs::read(&path)
            .await
            .map_err(|err| staging_io_error("Failed to read staging file", &path, err))
    }

    async fn delete_prefix(&self, prefix: &str) -> EtlResult<usize> {
        let path = self.resolve(prefix)?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(staging_io_error("Failed to inspect staging path", &path, err));
            }
        };

        if metadata.is_file() {
            fs::remove_file(&path)
                .await
                .map_err(|err| staging_io_error("Failed to delete staging file", &path, err))?;

            return Ok(1);
        }

        let mut deleted = 0;
        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|err| staging_io_error("Failed to list staging directory", &path, err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| staging_io_error("Failed to list staging directory", &path, err))?
        {
            if entry
                .file_type()
                .await
                .map_err(|err| staging_io_error("Failed to inspect staging path", &entry.path(), err))?
                .is_file()
            {
                deleted += 1;
            }
        }

        fs::remove_dir_all(&path)
            .await
            .map_err(|err| staging_io_error("Failed to delete staging directory", &path, err))?;

        Ok(deleted)
    }
}
