// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Worker request handler.
//!
//! The [`WorkerHandler`] wires the worker's pieces together and serves the
//! request surface:
//! - Node storage (catalog, lock table, capacity) behind one mutex
//! - Eviction engine consulting the coordinator's pin set
//! - Coordinator sync agent (registration, heartbeat, notifications)
//! - Maintenance loop (session expiry, access-time batching)
//!
//! # Lifecycle
//!
//! ```text
//! Created → Scanning → Registering → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cache_worker::{WorkerConfig, WorkerHandler, WorkerState};
//! use cache_worker::coordinator::{InMemoryConnector, InMemoryMaster};
//! use cache_worker::storage::local::LocalUnderFs;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let master = Arc::new(InMemoryMaster::new());
//! let worker = WorkerHandler::new(
//!     WorkerConfig::default(),
//!     Arc::new(InMemoryConnector::new(master)),
//!     Arc::new(LocalUnderFs),
//! );
//! assert_eq!(worker.state(), WorkerState::Created);
//!
//! // worker.initialize().await.expect("startup failed");
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{CommandOutcome, WorkerState};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::access_queue::AccessEventQueue;
use crate::clock::{SharedClock, SystemClock};
use crate::config::WorkerConfig;
use crate::coordinator::{CoordinatorSyncAgent, MasterConnector};
use crate::eviction::EvictionEngine;
use crate::maintenance::MaintenanceLoop;
use crate::node::{NodeStorage, SharedNode};
use crate::storage::catalog::CatalogError;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::storage::local::LocalCacheDir;
use crate::storage::traits::UnderFileSystem;
use crate::users::Users;
use crate::{FileId, UserId, WorkerId};

/// One worker node.
///
/// `Send + Sync`; share it behind an `Arc` between the request path and the
/// run loop. No method holds the node lock across an `.await`.
pub struct WorkerHandler {
    pub(super) config: WorkerConfig,

    /// Lifecycle state (broadcast to watchers)
    pub(super) state: watch::Sender<WorkerState>,
    pub(super) state_rx: watch::Receiver<WorkerState>,

    /// Id assigned by the coordinator; 0 until registered
    pub(super) worker_id: AtomicU64,

    pub(super) node: SharedNode,
    pub(super) agent: Arc<CoordinatorSyncAgent>,
    pub(super) eviction: EvictionEngine,
    pub(super) maintenance: MaintenanceLoop,
    pub(super) users: Arc<Users>,
    pub(super) access_queue: Arc<AccessEventQueue>,
    pub(super) cache_dir: LocalCacheDir,
    pub(super) under_fs: Arc<dyn UnderFileSystem>,
    pub(super) clock: SharedClock,
}

impl WorkerHandler {
    /// Create a worker using the system clock.
    ///
    /// The worker starts in `Created` state. Call
    /// [`initialize()`](Self::initialize) to scan the cache and register.
    pub fn new(
        config: WorkerConfig,
        connector: Arc<dyn MasterConnector>,
        under_fs: Arc<dyn UnderFileSystem>,
    ) -> Self {
        Self::with_clock(config, connector, under_fs, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: WorkerConfig,
        connector: Arc<dyn MasterConnector>,
        under_fs: Arc<dyn UnderFileSystem>,
        clock: SharedClock,
    ) -> Self {
        Self::with_circuit(config, connector, under_fs, clock, CircuitConfig::default())
    }

    /// Full constructor, also taking the coordinator circuit breaker settings.
    pub fn with_circuit(
        config: WorkerConfig,
        connector: Arc<dyn MasterConnector>,
        under_fs: Arc<dyn UnderFileSystem>,
        clock: SharedClock,
        circuit: CircuitConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(WorkerState::Created);

        let user_folder = config.user_temp_folder();
        let cache_dir = LocalCacheDir::new(&config.data_folder, &user_folder);
        let node = NodeStorage::new(config.capacity_bytes)
            .with_removal_limit(config.removal_queue_capacity)
            .into_shared();
        let agent = Arc::new(CoordinatorSyncAgent::with_circuit(
            connector,
            config.registration_retry(),
            circuit,
        ));
        let users = Arc::new(Users::new(
            clock.clone(),
            config.user_timeout_ms,
            user_folder,
            config.underfs_workers_folder.clone(),
        ));
        let access_queue = Arc::new(AccessEventQueue::new(config.access_queue_capacity));

        crate::metrics::set_capacity_bytes(config.capacity_bytes);

        Self {
            eviction: EvictionEngine::new(node.clone(), agent.clone(), cache_dir.clone()),
            maintenance: MaintenanceLoop::new(node.clone(), users.clone(), access_queue.clone(), clock.clone()),
            config,
            state: state_tx,
            state_rx,
            worker_id: AtomicU64::new(0),
            node,
            agent,
            users,
            access_queue,
            cache_dir,
            under_fs,
            clock,
        }
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Coordinator-assigned id, 0 before registration.
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.node.lock().capacity.used_bytes()
    }

    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.node.lock().capacity.capacity_bytes()
    }

    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.node.lock().capacity.available_bytes()
    }

    /// Bytes reserved for `user` and not yet backing a file.
    #[must_use]
    pub fn owned_bytes(&self, user: UserId) -> u64 {
        self.node.lock().capacity.owned_bytes(user)
    }

    /// Resident file ids, ascending.
    #[must_use]
    pub fn cached_file_ids(&self) -> Vec<FileId> {
        self.node.lock().catalog.file_ids()
    }

    #[must_use]
    pub fn is_cached(&self, file_id: FileId) -> bool {
        self.node.lock().catalog.contains(file_id)
    }

    #[must_use]
    pub fn is_locked(&self, file_id: FileId) -> bool {
        self.node.lock().locks.is_locked(file_id)
    }

    /// Removals not yet reported to the coordinator.
    #[must_use]
    pub fn pending_removals(&self) -> Vec<FileId> {
        self.node.lock().catalog.pending_removals().to_vec()
    }

    /// Local path of a cached file.
    #[must_use]
    pub fn cached_file_path(&self, file_id: FileId) -> PathBuf {
        self.cache_dir.file_path(file_id)
    }

    /// Run `op` under the node lock, retrying each time a file finishes its
    /// commit or delete for as long as `op` reports `file_id` busy.
    pub(super) async fn wait_for_idle<T>(
        &self,
        file_id: FileId,
        mut op: impl FnMut(&mut NodeStorage) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let io_done = self.node.lock().io_done();
        loop {
            let notified = io_done.notified();
            tokio::pin!(notified);
            // Registered before the check so a wakeup in between is not lost
            notified.as_mut().enable();

            let result = op(&mut *self.node.lock());
            match result {
                Err(CatalogError::Busy(_)) => {
                    debug!(file_id, "File busy, waiting for its I/O to finish");
                    notified.await;
                }
                other => return other,
            }
        }
    }

    pub(super) fn set_state(&self, state: WorkerState) {
        let _ = self.state.send(state);
        crate::metrics::set_worker_state(&state.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{InMemoryConnector, InMemoryMaster};
    use crate::storage::memory::InMemoryUnderFs;

    #[test]
    fn test_new_worker_is_created_and_unregistered() {
        let master = Arc::new(InMemoryMaster::new());
        let config = WorkerConfig {
            capacity_bytes: 500,
            ..WorkerConfig::default()
        };
        let worker = WorkerHandler::new(
            config,
            Arc::new(InMemoryConnector::new(master)),
            Arc::new(InMemoryUnderFs::new()),
        );

        assert_eq!(worker.state(), WorkerState::Created);
        assert!(!worker.is_running());
        assert_eq!(worker.worker_id(), 0);
        assert_eq!(worker.capacity_bytes(), 500);
        assert_eq!(worker.available_bytes(), 500);
        assert!(worker.cached_file_ids().is_empty());
    }

    #[test]
    fn test_state_receiver_sees_transitions() {
        let master = Arc::new(InMemoryMaster::new());
        let worker = WorkerHandler::new(
            WorkerConfig::default(),
            Arc::new(InMemoryConnector::new(master)),
            Arc::new(InMemoryUnderFs::new()),
        );
        let rx = worker.state_receiver();

        worker.set_state(WorkerState::Scanning);
        assert_eq!(*rx.borrow(), WorkerState::Scanning);
    }
}
