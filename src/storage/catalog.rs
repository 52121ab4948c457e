// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record of the files resident in this worker's cache.
//!
//! Each resident file has exactly one [`FileRecord`] holding both its size and
//! its last access time, so the two can never drift apart. Removed ids are
//! queued until the next heartbeat drains them; the queue is bounded and
//! an id cached again before it is reported leaves the queue.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::FileId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("file {0} is not in the local catalog")]
    NotFound(FileId),
    #[error("file {id} is cached with {expected} bytes, refusing to re-register it with {actual} bytes")]
    SizeMismatch {
        id: FileId,
        expected: u64,
        actual: u64,
    },
    #[error("file {0} has a cache write or delete in progress")]
    Busy(FileId),
}

/// Default bound on removals waiting for a heartbeat.
pub const DEFAULT_REMOVAL_LIMIT: usize = 10_000;

/// A file resident in the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub size_bytes: u64,
    /// Epoch millis of the last recorded access
    pub last_access_ms: u64,
}

/// Whether a registration created a record or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    Refreshed,
}

#[derive(Debug)]
pub struct StorageCatalog {
    files: HashMap<FileId, FileRecord>,
    pending_removals: Vec<FileId>,
    removal_limit: usize,
}

impl Default for StorageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::with_removal_limit(DEFAULT_REMOVAL_LIMIT)
    }

    /// Catalog whose pending-removal queue holds at most `limit` ids.
    #[must_use]
    pub fn with_removal_limit(limit: usize) -> Self {
        Self {
            files: HashMap::new(),
            pending_removals: Vec::new(),
            removal_limit: limit,
        }
    }

    /// Insert `id`, or refresh its access time if it is already resident with
    /// the same size.
    ///
    /// A fresh insert cancels any unreported removal of `id`.
    pub fn register(&mut self, id: FileId, size_bytes: u64, now_ms: u64) -> Result<Registration, CatalogError> {
        if let Some(existing) = self.files.get_mut(&id) {
            if existing.size_bytes != size_bytes {
                return Err(CatalogError::SizeMismatch {
                    id,
                    expected: existing.size_bytes,
                    actual: size_bytes,
                });
            }
            existing.last_access_ms = now_ms;
            return Ok(Registration::Refreshed);
        }

        self.files.insert(id, FileRecord { id, size_bytes, last_access_ms: now_ms });
        self.pending_removals.retain(|&removed| removed != id);
        Ok(Registration::Inserted)
    }

    /// Refresh the access time of `id`. Unknown ids are ignored: the file may
    /// have been evicted after the access was queued.
    pub fn record_access(&mut self, id: FileId, now_ms: u64) -> bool {
        match self.files.get_mut(&id) {
            Some(record) => {
                record.last_access_ms = record.last_access_ms.max(now_ms);
                true
            }
            None => false,
        }
    }

    /// Remove `id`, returning its size. The id is queued for the next heartbeat.
    pub fn remove(&mut self, id: FileId) -> Result<u64, CatalogError> {
        let record = self.files.remove(&id).ok_or(CatalogError::NotFound(id))?;
        if self.pending_removals.len() < self.removal_limit {
            self.pending_removals.push(id);
        } else {
            warn!(file_id = id, limit = self.removal_limit, "Removal queue full, dropping removal");
            crate::metrics::record_removals_dropped(1);
        }
        Ok(record.size_bytes)
    }

    /// Return and clear the ids removed since the last call.
    pub fn snapshot_and_clear_removals(&mut self) -> Vec<FileId> {
        std::mem::take(&mut self.pending_removals)
    }

    /// Put back removals that could not be reported, ahead of newer ones.
    ///
    /// Ids that were cached again in the meantime are not requeued. If the
    /// queue would exceed its bound the newest entries are dropped.
    pub fn requeue_removals(&mut self, mut ids: Vec<FileId>) {
        ids.retain(|id| !self.files.contains_key(id));
        ids.append(&mut self.pending_removals);

        if ids.len() > self.removal_limit {
            let dropped = ids.len() - self.removal_limit;
            ids.truncate(self.removal_limit);
            warn!(dropped, limit = self.removal_limit, "Removal queue full after requeue");
            crate::metrics::record_removals_dropped(dropped);
        }
        self.pending_removals = ids;
    }

    #[must_use]
    pub fn pending_removals(&self) -> &[FileId] {
        &self.pending_removals
    }

    #[must_use]
    pub fn get(&self, id: FileId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: FileId) -> bool {
        self.files.contains_key(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    /// Resident ids in ascending order.
    #[must_use]
    pub fn file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.files.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sum of resident file sizes.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.files.values().map(|r| r.size_bytes).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Parse a cache file name back into its id.
#[must_use]
pub fn file_id_from_name(name: &str) -> Option<FileId> {
    name.parse().ok()
}

/// On-disk name of `id`, in both the cache folder and user staging folders.
#[must_use]
pub fn file_name(id: FileId) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_remove_round_trip() {
        let mut catalog = StorageCatalog::new();

        assert_eq!(catalog.register(7, 300, 1_000).unwrap(), Registration::Inserted);
        assert_eq!(catalog.remove(7).unwrap(), 300);

        assert!(!catalog.contains(7));
        assert!(catalog.get(7).is_none());
        assert!(catalog.is_empty());
        assert_eq!(catalog.resident_bytes(), 0);
    }

    #[test]
    fn test_register_same_size_refreshes_access_time() {
        let mut catalog = StorageCatalog::new();
        catalog.register(1, 10, 100).unwrap();

        assert_eq!(catalog.register(1, 10, 500).unwrap(), Registration::Refreshed);
        assert_eq!(catalog.get(1).unwrap().last_access_ms, 500);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_register_size_mismatch() {
        let mut catalog = StorageCatalog::new();
        catalog.register(1, 10, 100).unwrap();

        let err = catalog.register(1, 11, 200).unwrap_err();
        assert_eq!(err, CatalogError::SizeMismatch { id: 1, expected: 10, actual: 11 });
        // The original record is untouched
        assert_eq!(catalog.get(1).unwrap().last_access_ms, 100);
    }

    #[test]
    fn test_record_access_unknown_is_noop() {
        let mut catalog = StorageCatalog::new();
        assert!(!catalog.record_access(42, 1_000));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_record_access_never_moves_backwards() {
        let mut catalog = StorageCatalog::new();
        catalog.register(1, 10, 1_000).unwrap();

        assert!(catalog.record_access(1, 900));
        assert_eq!(catalog.get(1).unwrap().last_access_ms, 1_000);

        catalog.record_access(1, 2_000);
        assert_eq!(catalog.get(1).unwrap().last_access_ms, 2_000);
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let mut catalog = StorageCatalog::new();
        assert_eq!(catalog.remove(3), Err(CatalogError::NotFound(3)));
        assert!(catalog.pending_removals().is_empty());
    }

    #[test]
    fn test_snapshot_and_clear_removals() {
        let mut catalog = StorageCatalog::new();
        for id in 1..=3 {
            catalog.register(id, 1, 0).unwrap();
        }
        catalog.remove(2).unwrap();
        catalog.remove(1).unwrap();

        assert_eq!(catalog.snapshot_and_clear_removals(), vec![2, 1]);
        assert!(catalog.snapshot_and_clear_removals().is_empty());
    }

    #[test]
    fn test_requeue_keeps_order() {
        let mut catalog = StorageCatalog::new();
        for id in 1..=3 {
            catalog.register(id, 1, 0).unwrap();
        }
        catalog.remove(1).unwrap();
        let drained = catalog.snapshot_and_clear_removals();
        catalog.remove(2).unwrap();

        catalog.requeue_removals(drained);
        assert_eq!(catalog.snapshot_and_clear_removals(), vec![1, 2]);
    }

    #[test]
    fn test_recache_cancels_pending_removal() {
        let mut catalog = StorageCatalog::new();
        catalog.register(5, 10, 0).unwrap();
        catalog.register(6, 10, 0).unwrap();
        catalog.remove(5).unwrap();
        catalog.remove(6).unwrap();

        assert_eq!(catalog.register(5, 10, 1).unwrap(), Registration::Inserted);
        assert_eq!(catalog.pending_removals(), &[6]);
    }

    #[test]
    fn test_requeue_skips_recached_ids() {
        let mut catalog = StorageCatalog::new();
        for id in 1..=2 {
            catalog.register(id, 1, 0).unwrap();
            catalog.remove(id).unwrap();
        }
        let drained = catalog.snapshot_and_clear_removals();
        catalog.register(1, 1, 5).unwrap();

        catalog.requeue_removals(drained);
        assert_eq!(catalog.pending_removals(), &[2]);
    }

    #[test]
    fn test_removal_queue_is_bounded() {
        let mut catalog = StorageCatalog::with_removal_limit(2);
        for id in 1..=3 {
            catalog.register(id, 1, 0).unwrap();
        }
        for id in 1..=3 {
            catalog.remove(id).unwrap();
        }
        assert_eq!(catalog.pending_removals(), &[1, 2]);
        assert!(catalog.is_empty());

        let drained = catalog.snapshot_and_clear_removals();
        catalog.register(9, 1, 0).unwrap();
        catalog.remove(9).unwrap();
        catalog.requeue_removals(drained);
        assert_eq!(catalog.pending_removals(), &[1, 2]);
    }

    #[test]
    fn test_file_ids_sorted_and_resident_bytes() {
        let mut catalog = StorageCatalog::new();
        catalog.register(9, 5, 0).unwrap();
        catalog.register(2, 7, 0).unwrap();

        assert_eq!(catalog.file_ids(), vec![2, 9]);
        assert_eq!(catalog.resident_bytes(), 12);
    }

    #[test]
    fn test_file_name_round_trip() {
        assert_eq!(file_id_from_name(&file_name(123)), Some(123));
        assert_eq!(file_id_from_name("not-a-file"), None);
    }
}
