// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process coordinator.
//!
//! Keeps the same bookkeeping a real coordinator keeps about its workers, so
//! the worker can be exercised end to end without a network. Failures can be
//! injected with [`InMemoryMaster::set_available`] and
//! [`InMemoryMaster::fail_registrations`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::traits::{
    Command, CommandType, CoordinatorError, MasterClient, MasterConnector, NetAddress, RegisterRequest,
};
use crate::{FileId, WorkerId};

/// What the coordinator knows about one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub address: NetAddress,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub file_ids: HashSet<FileId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub worker_id: WorkerId,
    pub size_bytes: u64,
    pub durable_path: String,
}

pub struct InMemoryMaster {
    next_worker_id: AtomicU64,
    workers: DashMap<WorkerId, WorkerInfo>,
    pinned: RwLock<HashSet<FileId>>,
    checkpoints: DashMap<FileId, CheckpointRecord>,
    commands: Mutex<VecDeque<Command>>,
    available: AtomicBool,
    failing_registrations: AtomicUsize,
    heartbeats: AtomicU64,
}

impl InMemoryMaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_worker_id: AtomicU64::new(1),
            workers: DashMap::new(),
            pinned: RwLock::new(HashSet::new()),
            checkpoints: DashMap::new(),
            commands: Mutex::new(VecDeque::new()),
            available: AtomicBool::new(true),
            failing_registrations: AtomicUsize::new(0),
            heartbeats: AtomicU64::new(0),
        }
    }

    /// Toggle whether every RPC fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` registrations.
    pub fn fail_registrations(&self, n: usize) {
        self.failing_registrations.store(n, Ordering::SeqCst);
    }

    pub fn pin(&self, id: FileId) {
        self.pinned.write().insert(id);
    }

    pub fn unpin(&self, id: FileId) {
        self.pinned.write().remove(&id);
    }

    /// Hand `command` to the next heartbeat.
    pub fn queue_command(&self, command: Command) {
        self.commands.lock().push_back(command);
    }

    /// Drop a worker from the registry, as after a coordinator restart.
    pub fn forget_worker(&self, worker_id: WorkerId) {
        self.workers.remove(&worker_id);
    }

    #[must_use]
    pub fn worker(&self, worker_id: WorkerId) -> Option<WorkerInfo> {
        self.workers.get(&worker_id).map(|w| w.value().clone())
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn checkpoint(&self, file_id: FileId) -> Option<CheckpointRecord> {
        self.checkpoints.get(&file_id).map(|c| c.value().clone())
    }

    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), CoordinatorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinatorError::Unavailable("coordinator offline".to_string()))
        }
    }

    fn unknown_worker(worker_id: WorkerId) -> CoordinatorError {
        CoordinatorError::Rejected(format!("unknown worker {}", worker_id))
    }
}

impl Default for InMemoryMaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MasterClient for InMemoryMaster {
    async fn register_worker(&self, request: RegisterRequest) -> Result<WorkerId, CoordinatorError> {
        self.check_available()?;
        let failing = self.failing_registrations.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_registrations.store(failing - 1, Ordering::SeqCst);
            return Err(CoordinatorError::Unavailable("registration refused".to_string()));
        }

        let existing = self
            .workers
            .iter()
            .find(|w| w.value().address == request.address)
            .map(|w| *w.key());
        let worker_id = existing.unwrap_or_else(|| self.next_worker_id.fetch_add(1, Ordering::SeqCst));

        debug!(worker_id, address = %request.address, "Worker registered");
        self.workers.insert(
            worker_id,
            WorkerInfo {
                address: request.address,
                capacity_bytes: request.capacity_bytes,
                used_bytes: request.used_bytes,
                file_ids: request.file_ids.into_iter().collect(),
            },
        );
        Ok(worker_id)
    }

    async fn worker_heartbeat(
        &self,
        worker_id: WorkerId,
        used_bytes: u64,
        removed_file_ids: &[FileId],
    ) -> Result<Command, CoordinatorError> {
        self.check_available()?;
        self.heartbeats.fetch_add(1, Ordering::SeqCst);

        let Some(mut worker) = self.workers.get_mut(&worker_id) else {
            return Ok(Command::new(CommandType::Register, Vec::new()));
        };
        worker.used_bytes = used_bytes;
        for id in removed_file_ids {
            worker.file_ids.remove(id);
        }
        drop(worker);

        Ok(self.commands.lock().pop_front().unwrap_or_default())
    }

    async fn cached_file(
        &self,
        worker_id: WorkerId,
        used_bytes: u64,
        file_id: FileId,
        _size_bytes: u64,
    ) -> Result<(), CoordinatorError> {
        self.check_available()?;
        let mut worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| Self::unknown_worker(worker_id))?;
        worker.used_bytes = used_bytes;
        worker.file_ids.insert(file_id);
        Ok(())
    }

    async fn add_checkpoint(
        &self,
        worker_id: WorkerId,
        file_id: FileId,
        size_bytes: u64,
        durable_path: &str,
    ) -> Result<(), CoordinatorError> {
        self.check_available()?;
        if !self.workers.contains_key(&worker_id) {
            return Err(Self::unknown_worker(worker_id));
        }
        self.checkpoints.insert(
            file_id,
            CheckpointRecord {
                worker_id,
                size_bytes,
                durable_path: durable_path.to_string(),
            },
        );
        Ok(())
    }

    async fn pinned_file_ids(&self) -> Result<HashSet<FileId>, CoordinatorError> {
        self.check_available()?;
        Ok(self.pinned.read().clone())
    }
}

/// Connector that always hands out the same [`InMemoryMaster`].
pub struct InMemoryConnector {
    master: Arc<InMemoryMaster>,
    connects: AtomicUsize,
}

impl InMemoryConnector {
    pub fn new(master: Arc<InMemoryMaster>) -> Self {
        Self {
            master,
            connects: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn master(&self) -> &Arc<InMemoryMaster> {
        &self.master
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MasterConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn MasterClient>, CoordinatorError> {
        self.master.check_available()?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn MasterClient> = self.master.clone();
        Ok(client)
    }
}
