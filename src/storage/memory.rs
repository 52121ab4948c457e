// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{UnderFileSystem, UnderFsError};

/// Durable store kept in a map of path → size.
pub struct InMemoryUnderFs {
    files: DashMap<String, u64>,
    fail_io: AtomicBool,
}

impl InMemoryUnderFs {
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            fail_io: AtomicBool::new(false),
        }
    }

    /// Create or overwrite `path` with `size` bytes
    pub fn put(&self, path: impl Into<String>, size: u64) {
        self.files.insert(path.into(), size);
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Make every subsequent call fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        self.fail_io.store(failing, Ordering::SeqCst);
    }

    fn check_io(&self) -> Result<(), UnderFsError> {
        if self.fail_io.load(Ordering::SeqCst) {
            Err(UnderFsError::Io("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryUnderFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnderFileSystem for InMemoryUnderFs {
    async fn rename(&self, src: &str, dst: &str) -> Result<bool, UnderFsError> {
        self.check_io()?;
        match self.files.remove(src) {
            Some((_, size)) => {
                self.files.insert(dst.to_string(), size);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn file_size(&self, path: &str) -> Result<u64, UnderFsError> {
        self.check_io()?;
        self.files
            .get(path)
            .map(|r| *r.value())
            .ok_or_else(|| UnderFsError::NotFound(path.to_string()))
    }
}
