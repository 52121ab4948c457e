// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The worker's single consistency domain.
//!
//! Catalog, lock table and capacity accountant are only ever mutated together
//! through one `parking_lot::Mutex`, so eviction always sees a view of "what is
//! locked" and "how much is used" that cannot shift mid-decision. Callers must
//! drop the guard before any `.await`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::capacity::CapacityAccountant;
use crate::eviction::lru;
use crate::locks::LockTable;
use crate::storage::catalog::{CatalogError, Registration, StorageCatalog};
use crate::{FileId, UserId};

pub type SharedNode = Arc<Mutex<NodeStorage>>;

/// Whether a user's reservation can back a file commit right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitReadiness {
    /// The bytes are held for this commit; pass the hold to
    /// [`NodeStorage::commit_file`] or [`NodeStorage::abort_commit`].
    Ready(CommitHold),
    /// The reservation is short by this many bytes and capacity could not
    /// cover it; the caller should evict and try again.
    Short(u64),
}

/// Bytes taken out of a user's reservation for one commit in progress.
///
/// While a hold exists its file id is busy: it cannot be evicted, removed,
/// or prepared for another commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a commit hold must be committed or aborted"]
pub struct CommitHold {
    pub user: UserId,
    pub id: FileId,
    pub size_bytes: u64,
    held: u64,
}

impl CommitHold {
    /// Zero when the file was already resident at prepare time.
    #[must_use]
    pub fn held_bytes(&self) -> u64 {
        self.held
    }
}

/// What a session expiry released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpiredUser {
    pub unlocked_files: HashSet<FileId>,
    pub released_bytes: u64,
}

#[derive(Debug)]
pub struct NodeStorage {
    pub catalog: StorageCatalog,
    pub locks: LockTable,
    pub capacity: CapacityAccountant,
    /// Ids with a commit or a physical delete in progress
    busy: HashSet<FileId>,
    io_done: Arc<Notify>,
}

impl NodeStorage {
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            catalog: StorageCatalog::new(),
            locks: LockTable::new(),
            capacity: CapacityAccountant::new(capacity_bytes),
            busy: HashSet::new(),
            io_done: Arc::new(Notify::new()),
        }
    }

    /// Bound the catalog's pending-removal queue.
    #[must_use]
    pub fn with_removal_limit(mut self, limit: usize) -> Self {
        self.catalog = StorageCatalog::with_removal_limit(limit);
        self
    }

    #[must_use]
    pub fn shared(capacity_bytes: u64) -> SharedNode {
        Arc::new(Mutex::new(Self::new(capacity_bytes)))
    }

    #[must_use]
    pub fn into_shared(self) -> SharedNode {
        Arc::new(Mutex::new(self))
    }

    /// Hold `size_bytes` of `user`'s reservation so `id` can be committed.
    ///
    /// Tops the reservation up from free capacity when possible. A file that is
    /// already resident with the same size needs no reservation at all. Fails
    /// with `Busy` while another commit or a delete of `id` is in progress.
    pub fn prepare_commit(
        &mut self,
        user: UserId,
        id: FileId,
        size_bytes: u64,
    ) -> Result<CommitReadiness, CatalogError> {
        if self.busy.contains(&id) {
            return Err(CatalogError::Busy(id));
        }

        if let Some(existing) = self.catalog.get(id) {
            if existing.size_bytes != size_bytes {
                return Err(CatalogError::SizeMismatch {
                    id,
                    expected: existing.size_bytes,
                    actual: size_bytes,
                });
            }
            self.busy.insert(id);
            return Ok(CommitReadiness::Ready(CommitHold { user, id, size_bytes, held: 0 }));
        }

        let owned = self.capacity.owned_bytes(user);
        if owned < size_bytes {
            let missing = size_bytes - owned;
            if !self.capacity.try_reserve(user, missing) {
                return Ok(CommitReadiness::Short(missing));
            }
            debug!(user_id = user, file_id = id, missing, "Topped up reservation for commit");
        }

        let held = self.capacity.hold_for_commit(user, size_bytes);
        debug_assert!(held, "reservation covers the commit after top-up");
        self.busy.insert(id);
        Ok(CommitReadiness::Ready(CommitHold { user, id, size_bytes, held: size_bytes }))
    }

    /// Register the held file as resident and settle its bytes.
    ///
    /// On error the hold goes back to the user's reservation.
    pub fn commit_file(&mut self, hold: CommitHold, now_ms: u64) -> Result<Registration, CatalogError> {
        self.finish_io(hold.id);

        let registration = match self.catalog.register(hold.id, hold.size_bytes, now_ms) {
            Ok(registration) => registration,
            Err(e) => {
                self.capacity.cancel_commit(hold.user, hold.held);
                return Err(e);
            }
        };

        match registration {
            Registration::Inserted => {
                // Resident files are busy for the whole commit, so a hold
                // taken on a resident file always refreshes.
                debug_assert_eq!(hold.held, hold.size_bytes);
                self.capacity.settle_commit(hold.held);
            }
            Registration::Refreshed => {
                // The resident record already accounts for these bytes.
                self.capacity.cancel_commit(hold.user, hold.held);
                let covered = hold.size_bytes.min(self.capacity.owned_bytes(hold.user));
                self.capacity.release(hold.user, covered);
            }
        }

        Ok(registration)
    }

    /// Give up a commit; its held bytes return to the user's reservation.
    pub fn abort_commit(&mut self, hold: CommitHold) {
        self.finish_io(hold.id);
        self.capacity.cancel_commit(hold.user, hold.held);
    }

    /// Pick the least recently used file that is neither locked, pinned nor
    /// busy, remove it and reclaim its bytes.
    ///
    /// The victim stays busy until [`finish_delete`](Self::finish_delete).
    pub fn evict_candidate(&mut self, pinned: &HashSet<FileId>) -> Option<(FileId, u64)> {
        let locks = &self.locks;
        let busy = &self.busy;
        let victim = lru::select_victim(self.catalog.records(), |id| {
            locks.is_locked(id) || pinned.contains(&id) || busy.contains(&id)
        })?
        .id;

        let size = self.take_file(victim).ok()?;
        Some((victim, size))
    }

    /// Remove a resident file and return its bytes to capacity.
    ///
    /// The id stays busy until [`finish_delete`](Self::finish_delete).
    pub fn remove_file(&mut self, id: FileId) -> Result<u64, CatalogError> {
        if self.busy.contains(&id) {
            return Err(CatalogError::Busy(id));
        }
        self.take_file(id)
    }

    /// Remove each listed file that is resident, unlocked and not busy.
    pub fn free_unlocked(&mut self, ids: &[FileId]) -> Vec<(FileId, u64)> {
        let mut freed = Vec::new();
        for &id in ids {
            if !self.catalog.contains(id) {
                continue;
            }
            if self.locks.is_locked(id) || self.busy.contains(&id) {
                debug!(file_id = id, "Not freeing locked or busy file");
                continue;
            }
            if let Ok(size) = self.take_file(id) {
                freed.push((id, size));
            }
        }
        freed
    }

    /// The cached copy of a removed file is gone from disk.
    pub fn finish_delete(&mut self, id: FileId) {
        self.finish_io(id);
    }

    #[must_use]
    pub fn is_busy(&self, id: FileId) -> bool {
        self.busy.contains(&id)
    }

    /// Notified whenever a file stops being busy.
    #[must_use]
    pub fn io_done(&self) -> Arc<Notify> {
        self.io_done.clone()
    }

    /// Release every lock and the whole reservation held by `user`.
    pub fn expire_user(&mut self, user: UserId) -> ExpiredUser {
        ExpiredUser {
            unlocked_files: self.locks.release_all(user),
            released_bytes: self.capacity.release_user(user),
        }
    }

    /// Push the accounting gauges.
    pub fn publish_gauges(&self) {
        crate::metrics::set_used_bytes(self.capacity.used_bytes());
        crate::metrics::set_cached_files(self.catalog.len());
        crate::metrics::set_locked_files(self.locks.locked_file_count());
    }

    fn take_file(&mut self, id: FileId) -> Result<u64, CatalogError> {
        let size = self.catalog.remove(id)?;
        self.capacity.reclaim(size);
        self.busy.insert(id);
        Ok(size)
    }

    fn finish_io(&mut self, id: FileId) {
        if self.busy.remove(&id) {
            self.io_done.notify_waiters();
        }
    }
}

/// Clears a file's busy mark when dropped, so a cancelled request cannot
/// leave the id blocked. An unsettled commit hold is aborted.
pub struct FileIoGuard {
    node: SharedNode,
    id: FileId,
    hold: Option<CommitHold>,
}

impl FileIoGuard {
    /// Guard the physical delete of a file already taken out of the catalog.
    #[must_use]
    pub fn deleting(node: &SharedNode, id: FileId) -> Self {
        Self { node: node.clone(), id, hold: None }
    }

    #[must_use]
    pub fn committing(node: &SharedNode, hold: CommitHold) -> Self {
        Self { node: node.clone(), id: hold.id, hold: Some(hold) }
    }

    /// Settle the guarded commit. Returns used bytes after the commit.
    pub fn commit(mut self, now_ms: u64) -> Result<u64, CatalogError> {
        let mut node = self.node.lock();
        let result = match self.hold.take() {
            Some(hold) => node.commit_file(hold, now_ms).map(|_| node.capacity.used_bytes()),
            None => Err(CatalogError::NotFound(self.id)),
        };
        node.publish_gauges();
        result
    }
}

impl Drop for FileIoGuard {
    fn drop(&mut self) {
        let mut node = self.node.lock();
        match self.hold.take() {
            Some(hold) => {
                debug!(file_id = hold.id, user_id = hold.user, "Commit abandoned, returning held bytes");
                node.abort_commit(hold);
            }
            None => node.finish_io(self.id),
        }
    }
}
