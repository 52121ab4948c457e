// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! User session liveness and per-user staging paths.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::{UserId, WorkerId};

/// Tracks when each user session last checked in.
pub struct Users {
    sessions: DashMap<UserId, u64>,
    clock: SharedClock,
    timeout_ms: u64,
    local_root: PathBuf,
    underfs_root: String,
}

impl Users {
    pub fn new(clock: SharedClock, timeout_ms: u64, local_root: impl Into<PathBuf>, underfs_root: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            timeout_ms,
            local_root: local_root.into(),
            underfs_root: underfs_root.into(),
        }
    }

    /// Refresh (or open) `user`'s session.
    pub fn user_heartbeat(&self, user: UserId) {
        let now = self.clock.now_ms();
        self.sessions.insert(user, now);
    }

    /// Open a session for `user` if none exists, leaving a live one alone.
    pub fn touch_if_absent(&self, user: UserId) {
        let now = self.clock.now_ms();
        self.sessions.entry(user).or_insert(now);
    }

    /// Remove and return the users whose last heartbeat is older than the
    /// timeout, in ascending order.
    pub fn check_status(&self) -> Vec<UserId> {
        let now = self.clock.now_ms();
        let timeout = self.timeout_ms;
        let mut expired = Vec::new();

        self.sessions.retain(|&user, last_seen| {
            let alive = now.saturating_sub(*last_seen) <= timeout;
            if !alive {
                expired.push(user);
            }
            alive
        });

        expired.sort_unstable();
        if !expired.is_empty() {
            debug!(count = expired.len(), "User sessions timed out");
        }
        expired
    }

    #[must_use]
    pub fn is_active(&self, user: UserId) -> bool {
        self.sessions.contains_key(&user)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// `<data>/<user temp folder>/<user>`
    #[must_use]
    pub fn user_temp_folder(&self, user: UserId) -> PathBuf {
        self.local_root.join(user.to_string())
    }

    /// `<underfs workers folder>/<worker>/<user>`
    #[must_use]
    pub fn user_underfs_temp_folder(&self, worker_id: WorkerId, user: UserId) -> String {
        format!("{}/{}/{}", self.underfs_root.trim_end_matches('/'), worker_id, user)
    }

    /// Remove an expired user's local staging folder. Failures are logged.
    pub async fn remove_temp_folder(&self, user: UserId) {
        let folder = self.user_temp_folder(user);
        match tokio::fs::remove_dir_all(&folder).await {
            Ok(()) => debug!(user_id = user, "Removed user temp folder"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(user_id = user, path = %folder.display(), error = %e, "Failed to remove user temp folder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn users(clock: &Arc<ManualClock>) -> Users {
        Users::new(clock.clone(), 1_000, "/tmp/cache/users", "/ufs/workers/")
    }

    #[test]
    fn test_sessions_expire_after_timeout() {
        let clock = Arc::new(ManualClock::new(0));
        let users = users(&clock);
        users.user_heartbeat(1);
        users.user_heartbeat(2);

        clock.advance(Duration::from_millis(1_000));
        assert!(users.check_status().is_empty());

        users.user_heartbeat(2);
        clock.advance(Duration::from_millis(1));
        assert_eq!(users.check_status(), vec![1]);
        assert!(!users.is_active(1));
        assert!(users.is_active(2));
    }

    #[test]
    fn test_touch_does_not_refresh_live_session() {
        let clock = Arc::new(ManualClock::new(0));
        let users = users(&clock);
        users.touch_if_absent(5);

        clock.advance(Duration::from_millis(800));
        users.touch_if_absent(5);
        clock.advance(Duration::from_millis(300));

        assert_eq!(users.check_status(), vec![5]);
        assert_eq!(users.active_count(), 0);
    }

    #[test]
    fn test_paths() {
        let clock = Arc::new(ManualClock::new(0));
        let users = users(&clock);

        assert_eq!(users.user_temp_folder(42), PathBuf::from("/tmp/cache/users/42"));
        assert_eq!(users.user_underfs_temp_folder(3, 42), "/ufs/workers/3/42");
    }

    #[tokio::test]
    async fn test_remove_temp_folder_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let users = Users::new(clock, 1_000, dir.path(), "/ufs");

        std::fs::create_dir_all(users.user_temp_folder(7)).unwrap();
        users.remove_temp_folder(7).await;
        assert!(!users.user_temp_folder(7).exists());

        // Already gone
        users.remove_temp_folder(7).await;
    }
}
