//! Atomic TOML documents.
//!
//! Every file-backed component of ula (store, asset cache, download
//! book-keeping, configuration) keeps one serde document per file and goes
//! through [`AtomicTomlFile`] to read and replace it.

use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use ula_core::error::UlaError;

/// Errors raised while reading or replacing a TOML document.
#[derive(Error, Debug)]
pub enum AtomicTomlError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Lock error on {path}: {message}")]
    Lock { path: PathBuf, message: String },
}

impl From<AtomicTomlError> for UlaError {
    fn from(err: AtomicTomlError) -> Self {
        match err {
            AtomicTomlError::Io { .. } | AtomicTomlError::Lock { .. } => {
                UlaError::io(err.to_string())
            }
            AtomicTomlError::Parse { .. } | AtomicTomlError::Serialize(_) => {
                UlaError::Serialization {
                    format: "TOML".to_string(),
                    message: err.to_string(),
                }
            }
        }
    }
}

/// A TOML document replaced as a whole.
///
/// - Writes go to a sibling temp file which is fsynced and renamed over the target
/// - `update` holds an exclusive lock file for the read-modify-write cycle
/// - A missing or blank file loads as `None`
pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<T>, AtomicTomlError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AtomicTomlError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        toml::from_str(&content)
            .map(Some)
            .map_err(|source| AtomicTomlError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Loads the document, falling back to `T::default()` when absent.
    pub fn load_or_default(&self) -> Result<T, AtomicTomlError>
    where
        T: Default,
    {
        Ok(self.load()?.unwrap_or_default())
    }

    pub fn save(&self, data: &T) -> Result<(), AtomicTomlError> {
        let content = toml::to_string_pretty(data)?;
        let io_err = |source| AtomicTomlError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp_path = self.temp_path();
        let mut tmp_file = File::create(&tmp_path).map_err(io_err)?;
        tmp_file.write_all(content.as_bytes()).map_err(io_err)?;
        tmp_file.sync_all().map_err(io_err)?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path).map_err(io_err)
    }

    /// Read-modify-write under an exclusive lock. Returns what `f` returned.
    pub fn update<R, F>(&self, f: F) -> Result<R, AtomicTomlError>
    where
        T: Default,
        F: FnOnce(&mut T) -> R,
    {
        let _lock = FileLock::acquire(&self.path)?;

        let mut data = self.load_or_default()?;
        let result = f(&mut data);
        self.save(&data)?;

        Ok(result)
    }

    /// Deletes the document. A missing file is not an error.
    pub fn remove(&self) -> Result<(), AtomicTomlError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AtomicTomlError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.path.with_file_name(format!(".{}.tmp", file_name))
    }
}

/// Exclusive lock held on `<file>.lock` until dropped.
struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, AtomicTomlError> {
        use fs2::FileExt;

        let lock_path = path.with_extension("lock");
        let io_err = |source| AtomicTomlError::Io {
            path: lock_path.clone(),
            source,
        };

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_err)?;

        file.lock_exclusive().map_err(|e| AtomicTomlError::Lock {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;

        Ok(FileLock { file, lock_path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        use fs2::FileExt;

        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.lock_path);
    }
}
