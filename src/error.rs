// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors returned from the worker's request surface.

use thiserror::Error;

use crate::access_queue::QueueFull;
use crate::coordinator::CoordinatorError;
use crate::storage::catalog::CatalogError;
use crate::storage::traits::UnderFsError;
use crate::FileId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("file {id} is cached with {expected} bytes, got {actual}")]
    SizeMismatch { id: FileId, expected: u64, actual: u64 },

    #[error("checkpoint of file {file_id} failed: {reason}")]
    CheckpointFailed { file_id: FileId, reason: String },

    #[error("no space for {requested} bytes, {available} available after exhausting eviction")]
    SpaceExhausted { requested: u64, available: u64 },

    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error("coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::CheckpointFailed { .. } => "checkpoint_failed",
            Self::SpaceExhausted { .. } => "space_exhausted",
            Self::QueueFull(_) => "queue_full",
            Self::CoordinatorUnavailable(_) => "coordinator_unavailable",
            Self::Io(_) => "io",
            Self::Config(_) => "config",
        }
    }

    pub(crate) fn checkpoint(file_id: FileId, err: UnderFsError) -> Self {
        WorkerError::CheckpointFailed {
            file_id,
            reason: err.to_string(),
        }
    }
}

impl From<CatalogError> for WorkerError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => WorkerError::NotFound(format!("file {}", id)),
            CatalogError::SizeMismatch { id, expected, actual } => WorkerError::SizeMismatch { id, expected, actual },
            busy @ CatalogError::Busy(_) => WorkerError::Io(busy.to_string()),
        }
    }
}

impl From<CoordinatorError> for WorkerError {
    fn from(err: CoordinatorError) -> Self {
        WorkerError::CoordinatorUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Io(err.to_string())
    }
}
