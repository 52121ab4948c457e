// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnderFsError {
    #[error("path not found in durable store: {0}")]
    NotFound(String),
    #[error("durable store I/O error: {0}")]
    Io(String),
}

/// The durable store checkpointed files are promoted into.
///
/// Paths are store-native strings (`/workers/3/17/42`, `hdfs://...`); only the
/// implementation knows how to interpret them.
#[async_trait]
pub trait UnderFileSystem: Send + Sync {
    /// Rename `src` to `dst`. `Ok(false)` means the store refused the rename
    /// without raising an error.
    async fn rename(&self, src: &str, dst: &str) -> Result<bool, UnderFsError>;

    async fn file_size(&self, path: &str) -> Result<u64, UnderFsError>;

    async fn exists(&self, path: &str) -> Result<bool, UnderFsError> {
        match self.file_size(path).await {
            Ok(_) => Ok(true),
            Err(UnderFsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
