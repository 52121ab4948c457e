// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the worker handler.

/// Worker lifecycle state.
///
/// Use [`super::WorkerHandler::state()`] to check the current state or
/// [`super::WorkerHandler::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, nothing on disk touched yet
    Created,
    /// Discovering files already in the local cache
    Scanning,
    /// Waiting for the coordinator to assign an id
    Registering,
    /// Serving requests
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Registering => write!(f, "Registering"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Result of handling one coordinator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Nothing to do
    Idle,
    /// Registered again, possibly under a new id
    Reregistered(crate::WorkerId),
    /// Files dropped from the local cache
    Freed(Vec<crate::FileId>),
    /// Command kind not understood
    Ignored,
}
