//! Local filesystem installation: extraction, asset copies, app scripts.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::paths::UlaPaths;
use ula_core::asset::{Asset, ROOTFS_ARCHIVE};
use ula_core::error::{Result, UlaError};
use ula_core::filesystem::Filesystem;
use ula_core::provision::{AppScriptInstaller, ExtractionOutcome, FilesystemExtractor, is_archive_file};

/// Marker written into a filesystem directory after a successful extraction.
pub const EXTRACTION_MARKER: &str = ".success_filesystem_extraction";

/// Installs filesystems below the files directory using the system `tar`.
pub struct LocalFilesystemManager {
    paths: UlaPaths,
    tar_program: PathBuf,
}

impl LocalFilesystemManager {
    pub fn new(paths: UlaPaths) -> Self {
        Self {
            paths,
            tar_program: PathBuf::from("tar"),
        }
    }

    pub fn with_tar_program(mut self, tar_program: impl Into<PathBuf>) -> Self {
        self.tar_program = tar_program.into();
        self
    }

    /// The archive next to the filesystem wins over the one in the distribution cache.
    async fn archive_for(&self, filesystem: &Filesystem) -> Option<PathBuf> {
        let candidates = [
            self.paths
                .filesystem_dir(&filesystem.directory_name())
                .join(ROOTFS_ARCHIVE),
            self.paths
                .asset_type_dir(&filesystem.distribution_type)
                .join(ROOTFS_ARCHIVE),
        ];
        for candidate in candidates {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    async fn run_tar(
        &self,
        archive: &Path,
        target: &Path,
        on_line: &(dyn Fn(String) + Send + Sync),
    ) -> Result<ExtractionOutcome> {
        let mut child = Command::new(&self.tar_program)
            .arg("-xzvf")
            .arg(archive)
            .arg("-C")
            .arg(target)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                UlaError::extraction(format!(
                    "Failed to start {}: {}",
                    self.tar_program.display(),
                    e
                ))
            })?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr);
                while let Ok(Some(line)) = read_lossy_line(&mut reader).await {
                    collected.push(line);
                }
            }
            collected
        });

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            while let Some(line) = read_lossy_line(&mut reader).await? {
                on_line(line);
            }
        }

        let status = child.wait().await?;
        let errors = stderr_task.await.unwrap_or_default();
        if status.success() {
            return Ok(ExtractionOutcome::Success);
        }

        let detail = errors.last().cloned().unwrap_or_else(|| status.to_string());
        Ok(ExtractionOutcome::Failure(detail))
    }

    async fn all_exist(&self, files: impl Iterator<Item = PathBuf>) -> bool {
        for file in files {
            if !tokio::fs::try_exists(&file).await.unwrap_or(false) {
                return false;
            }
        }
        true
    }
}

/// Reads one line, replacing bytes that are not UTF-8. `tar -v` echoes file
/// names as stored in the archive.
async fn read_lossy_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buffer = Vec::new();
    if reader.read_until(b'\n', &mut buffer).await? == 0 {
        return Ok(None);
    }
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

fn installable(assets: &[Asset]) -> impl Iterator<Item = &Asset> {
    assets.iter().filter(|asset| !asset.is_large())
}

#[async_trait]
impl FilesystemExtractor for LocalFilesystemManager {
    async fn has_been_extracted(&self, directory_name: &str) -> bool {
        let marker = self.paths.filesystem_dir(directory_name).join(EXTRACTION_MARKER);
        tokio::fs::try_exists(marker).await.unwrap_or(false)
    }

    async fn extract(
        &self,
        filesystem: &Filesystem,
        on_line: &(dyn Fn(String) + Send + Sync),
    ) -> Result<ExtractionOutcome> {
        let Some(archive) = self.archive_for(filesystem).await else {
            return Ok(ExtractionOutcome::Failure(format!(
                "No {} found for {}",
                ROOTFS_ARCHIVE, filesystem.distribution_type
            )));
        };
        let target = self.paths.filesystem_dir(&filesystem.directory_name());
        tokio::fs::create_dir_all(&target).await?;

        tracing::info!(
            filesystem = %filesystem.name,
            archive = %archive.display(),
            "Extracting filesystem"
        );
        let outcome = self.run_tar(&archive, &target, on_line).await?;
        if outcome == ExtractionOutcome::Success {
            tokio::fs::write(target.join(EXTRACTION_MARKER), b"").await?;
        }
        Ok(outcome)
    }

    async fn remove_archive_files(&self, directory_name: &str) -> Result<()> {
        let dir = self.paths.filesystem_dir(directory_name);
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_archive_file(&path) {
                tracing::debug!(path = %path.display(), "Removing archive");
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn copy_assets_onto_filesystem(&self, filesystem: &Filesystem) -> Result<()> {
        let source = self.paths.asset_type_dir(&filesystem.distribution_type);
        let target = self
            .paths
            .filesystem_support_dir(&filesystem.directory_name());
        tokio::fs::create_dir_all(&target).await?;

        let mut copied = 0;
        let mut entries = tokio::fs::read_dir(&source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_archive_file(&path) || !entry.file_type().await?.is_file() {
                continue;
            }
            let destination = target.join(entry.file_name());
            tokio::fs::copy(&path, &destination).await?;
            copied += 1;
        }

        tracing::info!(filesystem = %filesystem.name, copied, "Copied distribution assets");
        Ok(())
    }

    async fn assets_present_in_support_cache(&self, assets: &[Asset]) -> bool {
        self.all_exist(installable(assets).map(|asset| self.paths.asset_file(asset)))
            .await
    }

    async fn assets_present_on_filesystem(&self, directory_name: &str, assets: &[Asset]) -> bool {
        let support = self.paths.filesystem_support_dir(directory_name);
        self.all_exist(installable(assets).map(|asset| support.join(&asset.name)))
            .await
    }
}

#[async_trait]
impl AppScriptInstaller for LocalFilesystemManager {
    async fn copy_app_script(&self, app_name: &str, filesystem: &Filesystem) -> Result<()> {
        let script = self.paths.app_script(app_name);
        if !tokio::fs::try_exists(&script).await? {
            return Err(UlaError::not_found("app script", script.display().to_string()));
        }

        let target = self
            .paths
            .filesystem_support_dir(&filesystem.directory_name());
        tokio::fs::create_dir_all(&target).await?;
        tokio::fs::copy(&script, target.join(format!("{}.sh", app_name))).await?;
        tracing::info!(app = app_name, filesystem = %filesystem.name, "Copied app script");
        Ok(())
    }
}

#[cfg(test)]
#[path = "filesystem_manager_test.rs"]
mod tests;
