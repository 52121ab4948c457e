// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Everything that talks to the remote coordinator.
//!
//! The coordinator is the single source of truth for which worker holds which
//! file and which files are pinned. The worker reaches it only through
//! [`CoordinatorSyncAgent`], which sits on top of a [`MasterClient`]
//! connection opened by a [`MasterConnector`].
//!
//! ```text
//! WorkerHandler / EvictionEngine
//!          │
//!          ▼
//! CoordinatorSyncAgent ── retry (registration) / circuit breaker (steady state)
//!          │
//!          ▼
//! MasterConnector → MasterClient (RPC transport, or InMemoryMaster in tests)
//! ```

pub mod agent;
pub mod memory;
pub mod traits;

pub use agent::CoordinatorSyncAgent;
pub use memory::{InMemoryConnector, InMemoryMaster};
pub use traits::{
    Command, CommandType, CoordinatorError, MasterClient, MasterConnector, NetAddress, RegisterRequest,
};
