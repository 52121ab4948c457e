// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Worker lifecycle: startup discovery, registration, heartbeat, run loop
//! and shutdown.

use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::coordinator::{Command, CommandType, RegisterRequest};
use crate::error::WorkerError;
use crate::maintenance::MaintenanceReport;
use crate::node::FileIoGuard;
use crate::resilience::retry::{retry, RetryConfig};
use crate::WorkerId;

use super::{CommandOutcome, WorkerHandler, WorkerState};

impl WorkerHandler {
    /// Bring the worker up.
    ///
    /// 1. Create the data folder if missing (fails with `Config` if the path
    ///    is not a folder)
    /// 2. Charge and register every cache file found on disk
    /// 3. Wipe the user staging folder left by a previous run
    /// 4. Register with the coordinator, reporting what was found
    ///
    /// Step 4 retries under the configured registration policy, forever by
    /// default.
    #[tracing::instrument(skip(self), fields(data_folder = %self.config.data_folder))]
    pub async fn initialize(&self) -> Result<WorkerId, WorkerError> {
        let startup_start = Instant::now();
        info!("Starting cache worker");

        // ========== PHASE 1: Discover resident files ==========
        let phase_start = Instant::now();
        self.set_state(WorkerState::Scanning);

        match self.cache_dir.ensure_layout().await {
            Ok(true) => info!("Created local cache folders"),
            Ok(false) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                error!(error = %e, "Data folder is unusable");
                return Err(WorkerError::Config(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let found = self.cache_dir.scan().await?;
        let now = self.clock.now_ms();
        {
            let mut node = self.node.lock();
            for &(file_id, size_bytes) in &found {
                if !node.capacity.charge_resident(size_bytes) {
                    let available = node.capacity.available_bytes();
                    error!(file_id, size_bytes, available, "Cached files exceed worker capacity");
                    return Err(WorkerError::SpaceExhausted {
                        requested: size_bytes,
                        available,
                    });
                }
                node.catalog.register(file_id, size_bytes, now)?;
            }
            node.publish_gauges();
        }
        info!(files = found.len(), used_bytes = self.used_bytes(), "Local cache scanned");
        crate::metrics::record_startup_phase("scan", phase_start.elapsed());

        self.cache_dir.reset_user_folder().await?;

        // ========== PHASE 2: Register with the coordinator ==========
        let phase_start = Instant::now();
        self.set_state(WorkerState::Registering);
        let worker_id = self.register().await?;
        crate::metrics::record_startup_phase("register", phase_start.elapsed());

        self.set_state(WorkerState::Running);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(worker_id, "Cache worker running");
        Ok(worker_id)
    }

    /// Register (or re-register) with the coordinator, reporting the current
    /// resident files and usage. Stores and returns the assigned id.
    #[tracing::instrument(skip(self))]
    pub async fn register(&self) -> Result<WorkerId, WorkerError> {
        let request = {
            let node = self.node.lock();
            RegisterRequest {
                address: self.config.worker_address(),
                capacity_bytes: node.capacity.capacity_bytes(),
                used_bytes: node.capacity.used_bytes(),
                file_ids: node.catalog.file_ids(),
            }
        };

        let worker_id = self.agent.register(request).await?;
        let previous = self.worker_id.swap(worker_id, Ordering::SeqCst);
        if previous != 0 && previous != worker_id {
            info!(previous, worker_id, "Worker id changed on re-registration");
        }
        Ok(worker_id)
    }

    /// Report usage and pending removals to the coordinator.
    ///
    /// If the call fails the removals are queued again for the next
    /// heartbeat. The returned command is not acted on here; see
    /// [`handle_command`](Self::handle_command).
    #[tracing::instrument(skip(self))]
    pub async fn heartbeat(&self) -> Result<Command, WorkerError> {
        let (removed, used_bytes) = {
            let mut node = self.node.lock();
            (node.catalog.snapshot_and_clear_removals(), node.capacity.used_bytes())
        };

        match self.agent.heartbeat(self.worker_id(), used_bytes, &removed).await {
            Ok(command) => {
                crate::metrics::record_heartbeat_removals(removed.len());
                debug!(removed = removed.len(), used_bytes, command = ?command.kind, "Heartbeat sent");
                Ok(command)
            }
            Err(e) => {
                if !removed.is_empty() {
                    self.node.lock().catalog.requeue_removals(removed);
                }
                Err(e.into())
            }
        }
    }

    /// Act on a command returned by a heartbeat.
    pub async fn handle_command(&self, command: Command) -> Result<CommandOutcome, WorkerError> {
        match command.kind {
            CommandType::Nothing => Ok(CommandOutcome::Idle),
            CommandType::Register => {
                info!("Coordinator asked for re-registration");
                let worker_id = self.register().await?;
                Ok(CommandOutcome::Reregistered(worker_id))
            }
            CommandType::Free | CommandType::Delete => {
                let freed = {
                    let mut node = self.node.lock();
                    let freed = node.free_unlocked(&command.data);
                    node.publish_gauges();
                    freed
                };

                let guards: Vec<FileIoGuard> = freed
                    .iter()
                    .map(|&(file_id, _)| FileIoGuard::deleting(&self.node, file_id))
                    .collect();

                let mut ids = Vec::with_capacity(freed.len());
                for ((file_id, size_bytes), guard) in freed.into_iter().zip(guards) {
                    if let Err(e) = self.cache_dir.delete(file_id).await {
                        warn!(file_id, error = %e, "Failed to delete freed file from local cache");
                    }
                    drop(guard);
                    debug!(file_id, size_bytes, "Freed file on coordinator request");
                    ids.push(file_id);
                }
                info!(requested = command.data.len(), freed = ids.len(), kind = ?command.kind, "Handled free command");
                Ok(CommandOutcome::Freed(ids))
            }
            CommandType::Unknown => {
                warn!(data = ?command.data, "Ignoring unknown coordinator command");
                Ok(CommandOutcome::Ignored)
            }
        }
    }

    /// Replace the coordinator connection, retrying with backoff.
    pub async fn reset_master_client(&self) -> Result<(), WorkerError> {
        retry("reset_connection", &RetryConfig::reconnect(), || self.agent.reset_connection())
            .await
            .map_err(Into::into)
    }

    /// One maintenance pass: expire stale sessions and apply access events.
    pub async fn check_status(&self) -> MaintenanceReport {
        self.maintenance.run_once().await
    }

    /// Run heartbeats and maintenance on their intervals until `shutdown`
    /// turns true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Cache worker run loop started");

        let mut heartbeat_interval =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        let mut maintenance_interval =
            tokio::time::interval(Duration::from_millis(self.config.maintenance_interval_ms));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = heartbeat_interval.tick() => {
                    if self.heartbeat_tick(&mut shutdown).await.is_break() {
                        break;
                    }
                }

                _ = maintenance_interval.tick() => {
                    self.check_status().await;
                }
            }
        }

        self.shutdown();
    }

    /// One heartbeat, and a reconnect if it failed. The reconnect backs off
    /// for seconds, so it gives way to a shutdown request.
    async fn heartbeat_tick(&self, shutdown: &mut watch::Receiver<bool>) -> ControlFlow<()> {
        match self.heartbeat().await {
            Ok(command) => {
                if let Err(e) = self.handle_command(command).await {
                    warn!(error = %e, "Failed to handle coordinator command");
                }
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat failed, resetting coordinator connection");
                tokio::select! {
                    reset = self.reset_master_client() => {
                        if let Err(e) = reset {
                            error!(error = %e, "Could not reconnect to coordinator");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown requested while reconnecting to coordinator");
                            return ControlFlow::Break(());
                        }
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Mark the worker as shutting down.
    pub fn shutdown(&self) {
        info!(worker_id = self.worker_id(), "Cache worker shutting down");
        self.set_state(WorkerState::ShuttingDown);
    }
}
