// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic housekeeping: expire stale user sessions and fold buffered
//! access events into the catalog.

use std::sync::Arc;

use tracing::{debug, info};

use crate::access_queue::AccessEventQueue;
use crate::clock::SharedClock;
use crate::node::SharedNode;
use crate::users::Users;
use crate::UserId;

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Users whose session timed out, ascending
    pub expired_users: Vec<UserId>,
    /// Locks dropped on behalf of expired users
    pub unlocked_files: usize,
    /// Reserved bytes returned to capacity
    pub released_bytes: u64,
    /// Access events applied to resident files
    pub accesses_applied: usize,
    /// Access events for files no longer resident
    pub accesses_stale: usize,
}

pub struct MaintenanceLoop {
    node: SharedNode,
    users: Arc<Users>,
    queue: Arc<AccessEventQueue>,
    clock: SharedClock,
}

impl MaintenanceLoop {
    pub fn new(node: SharedNode, users: Arc<Users>, queue: Arc<AccessEventQueue>, clock: SharedClock) -> Self {
        Self { node, users, queue, clock }
    }

    /// Run a single pass. Scheduling is the caller's job.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for user in self.users.check_status() {
            let expired = self.node.lock().expire_user(user);
            info!(
                user_id = user,
                unlocked = expired.unlocked_files.len(),
                released_bytes = expired.released_bytes,
                "User session expired"
            );
            report.unlocked_files += expired.unlocked_files.len();
            report.released_bytes += expired.released_bytes;
            report.expired_users.push(user);

            self.users.remove_temp_folder(user).await;
        }

        let accesses = self.queue.drain();
        if !accesses.is_empty() {
            let now = self.clock.now_ms();
            let mut node = self.node.lock();
            for id in accesses {
                if node.catalog.record_access(id, now) {
                    report.accesses_applied += 1;
                } else {
                    report.accesses_stale += 1;
                }
            }
        }

        self.node.lock().publish_gauges();
        crate::metrics::record_sessions_expired(report.expired_users.len());
        crate::metrics::record_access_applied(report.accesses_applied);
        crate::metrics::set_active_sessions(self.users.active_count());

        debug!(?report, "Maintenance pass done");
        report
    }
}
