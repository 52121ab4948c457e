//! # Cache Worker
//!
//! Worker-side runtime of a distributed, memory-centric storage service.
//!
//! A worker keeps a set of files cached on local (usually RAM-backed)
//! storage, shares a fixed capacity budget between concurrent user sessions,
//! evicts cold files under a pinning policy set by a remote coordinator, and
//! keeps that coordinator informed through heartbeats and notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerHandler                         │
//! │  • Request surface: cache, checkpoint, lock, space, paths  │
//! │  • Lifecycle: initialize → run loop → shutdown             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                    │
//!          ▼                   ▼                    ▼
//! ┌──────────────────┐ ┌────────────────┐ ┌──────────────────────┐
//! │   NodeStorage    │ │ EvictionEngine │ │ CoordinatorSyncAgent │
//! │ (one mutex)      │ │ LRU, skips     │ │ register (retry)     │
//! │ • catalog        │◄┤ locked and     ├►│ heartbeat, notify    │
//! │ • lock table     │ │ pinned files   │ │ pin set (fail-open)  │
//! │ • capacity       │ └────────────────┘ └──────────────────────┘
//! └──────────────────┘
//!          ▲
//!          │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MaintenanceLoop                         │
//! │  • Expires stale sessions (locks + reservations released)  │
//! │  • Drains the bounded access queue into the catalog        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cache_worker::{WorkerConfig, WorkerHandler};
//! use cache_worker::coordinator::{InMemoryConnector, InMemoryMaster};
//! use cache_worker::storage::local::LocalUnderFs;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = WorkerConfig {
//!         data_folder: "/mnt/ramdisk/worker".into(),
//!         capacity_bytes: 512 * 1024 * 1024,
//!         ..Default::default()
//!     };
//!
//!     let master = Arc::new(InMemoryMaster::new());
//!     let worker = Arc::new(WorkerHandler::new(
//!         config,
//!         Arc::new(InMemoryConnector::new(master)),
//!         Arc::new(LocalUnderFs),
//!     ));
//!
//!     worker.initialize().await.expect("Failed to start");
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let runner = worker.clone();
//!     let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });
//!
//!     if worker.request_space(7, 4096).await {
//!         // ... user 7 writes into worker.get_user_temp_folder(7) ...
//!         worker.cache_file(7, 42).await.expect("commit failed");
//!     }
//!
//!     shutdown_tx.send(true).ok();
//!     handle.await.ok();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`handler`]: The [`WorkerHandler`] orchestrating all components
//! - [`node`]: The single consistency domain (catalog, locks, capacity)
//! - [`storage`]: Catalog, local cache folder, durable store adapters
//! - [`capacity`]: Reservation and release accounting
//! - [`locks`]: File ↔ user lock relation
//! - [`eviction`]: LRU victim selection and the eviction engine
//! - [`coordinator`]: Coordinator client traits, sync agent, in-memory coordinator
//! - [`maintenance`]: Session expiry and access-time batching
//! - [`resilience`]: Circuit breaker and retry policies

pub mod access_queue;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod handler;
pub mod locks;
pub mod maintenance;
pub mod metrics;
pub mod node;
pub mod resilience;
pub mod storage;
pub mod users;

/// Coordinator-wide file handle.
pub type FileId = u64;
/// User session id.
pub type UserId = u64;
/// Coordinator-assigned worker id; 0 means unassigned.
pub type WorkerId = u64;

pub use access_queue::{AccessEventQueue, QueueFull};
pub use capacity::{CapacityAccountant, ReleaseOutcome};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::WorkerConfig;
pub use coordinator::{
    Command, CommandType, CoordinatorError, CoordinatorSyncAgent, MasterClient, MasterConnector, NetAddress,
};
pub use error::WorkerError;
pub use eviction::EvictionEngine;
pub use handler::{CommandOutcome, WorkerHandler, WorkerState};
pub use locks::LockTable;
pub use maintenance::{MaintenanceLoop, MaintenanceReport};
pub use node::{NodeStorage, SharedNode};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use storage::catalog::{CatalogError, FileRecord, StorageCatalog};
pub use storage::traits::{UnderFileSystem, UnderFsError};
pub use crate::metrics::LatencyTimer;
