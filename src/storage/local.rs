// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local filesystem pieces: the worker's cache directory and a durable-store
//! adapter for stores mounted as a local path.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::catalog::{file_id_from_name, file_name};
use super::traits::{UnderFileSystem, UnderFsError};
use crate::FileId;

/// The worker's local cache folder (one file per id) and its user staging root.
#[derive(Debug, Clone)]
pub struct LocalCacheDir {
    data_folder: PathBuf,
    user_folder: PathBuf,
}

impl LocalCacheDir {
    pub fn new(data_folder: impl Into<PathBuf>, user_folder: impl Into<PathBuf>) -> Self {
        Self {
            data_folder: data_folder.into(),
            user_folder: user_folder.into(),
        }
    }

    #[must_use]
    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    #[must_use]
    pub fn user_folder(&self) -> &Path {
        &self.user_folder
    }

    #[must_use]
    pub fn file_path(&self, id: FileId) -> PathBuf {
        self.data_folder.join(file_name(id))
    }

    /// Create the data and staging folders if the data folder is missing.
    ///
    /// Returns `true` when the layout was created from scratch. Fails with
    /// `InvalidInput` if the data path exists but is not a directory.
    pub async fn ensure_layout(&self) -> io::Result<bool> {
        match fs::metadata(&self.data_folder).await {
            Ok(meta) if meta.is_dir() => Ok(false),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a folder", self.data_folder.display()),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.data_folder).await?;
                fs::create_dir_all(&self.user_folder).await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// List resident cache files as `(id, size)`, sorted by id.
    ///
    /// Directories (including the staging root) and files whose name is not
    /// an id are skipped.
    pub async fn scan(&self) -> io::Result<Vec<(FileId, u64)>> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(&self.data_folder).await?;

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(file_id_from_name) {
                Some(id) => found.push((id, meta.len())),
                None => warn!(path = %entry.path().display(), "Skipping cache file with non-numeric name"),
            }
        }

        found.sort_unstable_by_key(|(id, _)| *id);
        Ok(found)
    }

    /// Wipe and recreate the user staging root.
    pub async fn reset_user_folder(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.user_folder).await {
            Ok(()) => debug!(path = %self.user_folder.display(), "Removed stale user staging folder"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.user_folder.display(), error = %e, "Failed to clear user staging folder"),
        }
        fs::create_dir_all(&self.user_folder).await
    }

    /// Size of a staged file; `NotFound` if it is absent or not a regular file.
    pub async fn staged_size(&self, path: &Path) -> io::Result<u64> {
        let meta = fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a file", path.display()),
            ));
        }
        Ok(meta.len())
    }

    /// Move a staged file into the cache under `id`.
    pub async fn promote(&self, staged: &Path, id: FileId) -> io::Result<()> {
        fs::rename(staged, self.file_path(id)).await
    }

    pub async fn delete(&self, id: FileId) -> io::Result<()> {
        fs::remove_file(self.file_path(id)).await
    }
}

/// Durable store mounted at a local path (NFS, FUSE, or plain disk in tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalUnderFs;

fn map_io(path: &str, e: io::Error) -> UnderFsError {
    if e.kind() == io::ErrorKind::NotFound {
        UnderFsError::NotFound(path.to_string())
    } else {
        UnderFsError::Io(format!("{}: {}", path, e))
    }
}

#[async_trait]
impl UnderFileSystem for LocalUnderFs {
    async fn rename(&self, src: &str, dst: &str) -> Result<bool, UnderFsError> {
        if fs::metadata(src).await.is_err() {
            return Ok(false);
        }
        if let Some(parent) = Path::new(dst).parent() {
            fs::create_dir_all(parent).await.map_err(|e| map_io(dst, e))?;
        }
        fs::rename(src, dst).await.map_err(|e| map_io(src, e))?;
        Ok(true)
    }

    async fn file_size(&self, path: &str) -> Result<u64, UnderFsError> {
        let meta = fs::metadata(path).await.map_err(|e| map_io(path, e))?;
        Ok(meta.len())
    }
}
