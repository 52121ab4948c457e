// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request surface: file commits, checkpoints, locks, space and paths.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::capacity::ReleaseOutcome;
use crate::error::WorkerError;
use crate::metrics::LatencyTimer;
use crate::node::{CommitReadiness, FileIoGuard};
use crate::storage::catalog::file_name;
use crate::{FileId, UserId};

use super::WorkerHandler;

impl WorkerHandler {
    /// Note an access to `file_id`. Applied to the catalog by the next
    /// maintenance pass.
    pub fn access_file(&self, file_id: FileId) -> Result<(), WorkerError> {
        match self.access_queue.push(file_id) {
            Ok(()) => Ok(()),
            Err(full) => {
                debug!(file_id, "Access queue full, dropping event");
                crate::metrics::record_access_dropped();
                Err(full.into())
            }
        }
    }

    /// Commit `user`'s staged copy of `file_id` into the local cache.
    ///
    /// The staged file's size is charged against the user's reservation,
    /// which is topped up (evicting if needed) when it is short. On
    /// `SpaceExhausted` the file stays staged. The coordinator is told after
    /// the local commit; a failed notification is logged only.
    #[tracing::instrument(skip(self))]
    pub async fn cache_file(&self, user: UserId, file_id: FileId) -> Result<(), WorkerError> {
        let _timer = LatencyTimer::new("cache_file");
        self.users.touch_if_absent(user);

        let result = self.commit_staged(user, file_id).await;
        crate::metrics::record_request("cache_file", status(&result));
        let (size_bytes, used_bytes) = result?;

        if let Err(e) = self
            .agent
            .notify_cached(self.worker_id(), used_bytes, file_id, size_bytes)
            .await
        {
            warn!(file_id, error = %e, "Failed to notify coordinator of cached file");
        }

        info!(user_id = user, file_id, size_bytes, "File cached");
        Ok(())
    }

    async fn commit_staged(&self, user: UserId, file_id: FileId) -> Result<(u64, u64), WorkerError> {
        let staged = self.users.user_temp_folder(user).join(file_name(file_id));
        let size_bytes = match self.cache_dir.staged_size(&staged).await {
            Ok(size) => size,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WorkerError::NotFound(format!("staged file {}", staged.display())));
            }
            Err(e) => return Err(e.into()),
        };

        let hold = loop {
            let readiness = self
                .wait_for_idle(file_id, |node| node.prepare_commit(user, file_id, size_bytes))
                .await?;
            match readiness {
                CommitReadiness::Ready(hold) => break hold,
                CommitReadiness::Short(missing) => {
                    debug!(user_id = user, file_id, missing, "Reservation short, evicting");
                    if !self.eviction.evict_one().await {
                        return Err(WorkerError::SpaceExhausted {
                            requested: missing,
                            available: self.available_bytes(),
                        });
                    }
                }
            }
        };

        // Dropping the guard before commit returns the held bytes.
        let guard = FileIoGuard::committing(&self.node, hold);
        self.cache_dir.promote(&staged, file_id).await?;

        let used_bytes = guard.commit(self.clock.now_ms())?;
        Ok((size_bytes, used_bytes))
    }

    /// Promote `user`'s staged copy of `file_id` in the durable store and
    /// record the checkpoint with the coordinator.
    #[tracing::instrument(skip(self))]
    pub async fn add_checkpoint(&self, user: UserId, file_id: FileId) -> Result<(), WorkerError> {
        let _timer = LatencyTimer::new("add_checkpoint");
        let result = self.checkpoint(user, file_id).await;
        crate::metrics::record_request("add_checkpoint", status(&result));
        result
    }

    async fn checkpoint(&self, user: UserId, file_id: FileId) -> Result<(), WorkerError> {
        let src = format!("{}/{}", self.get_user_underfs_temp_folder(user), file_name(file_id));
        let dst = format!(
            "{}/{}",
            self.config.underfs_data_folder.trim_end_matches('/'),
            file_name(file_id)
        );

        match self.under_fs.rename(&src, &dst).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(WorkerError::CheckpointFailed {
                    file_id,
                    reason: format!("durable store refused rename {} -> {}", src, dst),
                });
            }
            Err(e) => return Err(WorkerError::checkpoint(file_id, e)),
        }

        let size_bytes = self
            .under_fs
            .file_size(&dst)
            .await
            .map_err(|e| WorkerError::checkpoint(file_id, e))?;

        self.agent
            .finalize_checkpoint(self.worker_id(), file_id, size_bytes, &dst)
            .await?;

        info!(user_id = user, file_id, size_bytes, path = %dst, "Checkpoint added");
        Ok(())
    }

    /// Protect `file_id` from eviction on behalf of `user`. Idempotent.
    pub fn lock_file(&self, file_id: FileId, user: UserId) {
        self.users.touch_if_absent(user);
        let mut node = self.node.lock();
        if node.locks.lock(file_id, user) {
            debug!(file_id, user_id = user, "File locked");
        }
        node.publish_gauges();
    }

    /// Idempotent; unlocking a file the user does not hold is a no-op.
    pub fn unlock_file(&self, file_id: FileId, user: UserId) {
        let mut node = self.node.lock();
        if node.locks.unlock(file_id, user) {
            debug!(file_id, user_id = user, "File unlocked");
        }
        node.publish_gauges();
    }

    /// Reserve `bytes` for `user`, evicting one file at a time until the
    /// reservation fits or nothing evictable is left.
    ///
    /// Evictions performed on the way are kept even when the request fails.
    #[tracing::instrument(skip(self))]
    pub async fn request_space(&self, user: UserId, bytes: u64) -> bool {
        let _timer = LatencyTimer::new("request_space");
        self.users.touch_if_absent(user);

        let capacity = self.capacity_bytes();
        if bytes > capacity {
            warn!(user_id = user, bytes, capacity, "Requested more space than the worker has");
            crate::metrics::record_space_request(false, bytes);
            return false;
        }

        loop {
            let granted = {
                let mut node = self.node.lock();
                let granted = node.capacity.try_reserve(user, bytes);
                if granted {
                    node.publish_gauges();
                }
                granted
            };
            if granted {
                crate::metrics::record_space_request(true, bytes);
                return true;
            }

            if !self.eviction.evict_one().await {
                info!(user_id = user, bytes, available = self.available_bytes(), "Space request denied");
                crate::metrics::record_space_request(false, bytes);
                return false;
            }
        }
    }

    /// Hand back part of `user`'s reservation.
    ///
    /// Returning more than the user owns releases what it owns; the excess
    /// is logged and counted, not applied.
    pub fn return_space(&self, user: UserId, bytes: u64) -> ReleaseOutcome {
        let outcome = {
            let mut node = self.node.lock();
            let outcome = node.capacity.release(user, bytes);
            node.publish_gauges();
            outcome
        };
        if outcome.excess > 0 {
            crate::metrics::record_over_release(outcome.excess);
        }
        outcome
    }

    pub fn user_heartbeat(&self, user: UserId) {
        self.users.user_heartbeat(user);
    }

    /// Drop a resident file from the cache and queue it for the next heartbeat.
    ///
    /// Waits for an in-progress commit of the same file to finish first.
    pub async fn remove_file(&self, file_id: FileId) -> Result<u64, WorkerError> {
        let size_bytes = self
            .wait_for_idle(file_id, |node| {
                let size = node.remove_file(file_id)?;
                node.publish_gauges();
                Ok(size)
            })
            .await?;

        let _deleting = FileIoGuard::deleting(&self.node, file_id);
        if let Err(e) = self.cache_dir.delete(file_id).await {
            warn!(file_id, error = %e, "Failed to delete removed file from local cache");
        }
        info!(file_id, size_bytes, "File removed");
        Ok(size_bytes)
    }

    pub fn get_data_folder(&self) -> &Path {
        self.cache_dir.data_folder()
    }

    pub fn get_user_temp_folder(&self, user: UserId) -> PathBuf {
        self.users.user_temp_folder(user)
    }

    /// Durable-store staging folder for `user` on this worker.
    pub fn get_user_underfs_temp_folder(&self, user: UserId) -> String {
        self.users.user_underfs_temp_folder(self.worker_id(), user)
    }
}

fn status<T>(result: &Result<T, WorkerError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    }
}
