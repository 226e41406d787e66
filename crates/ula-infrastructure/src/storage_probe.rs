//! Free space of the volume holding the files directory.

use async_trait::async_trait;
use std::path::PathBuf;

use ula_core::error::{Result, UlaError};
use ula_core::provision::StorageProbe;

const BYTES_PER_MB: u64 = 1024 * 1024;

pub struct DiskStorageProbe {
    path: PathBuf,
}

impl DiskStorageProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StorageProbe for DiskStorageProbe {
    async fn available_storage_mb(&self) -> Result<u64> {
        tokio::fs::create_dir_all(&self.path).await?;
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || fs2::available_space(path))
            .await
            .map_err(|e| UlaError::internal(e.to_string()))??;
        Ok(bytes / BYTES_PER_MB)
    }
}
