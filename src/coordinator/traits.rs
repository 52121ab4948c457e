// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FileId, WorkerId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
    #[error("coordinator rejected request: {0}")]
    Rejected(String),
    #[error("coordinator circuit open, call not attempted")]
    CircuitOpen,
}

/// Host and port of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetAddress {
    pub host: String,
    pub port: u16,
}

impl NetAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Instruction piggybacked on a heartbeat response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    #[default]
    Nothing,
    /// The coordinator lost track of this worker; register again.
    Register,
    /// Drop the listed files from the local cache.
    Free,
    /// The listed files were deleted; drop them from the local cache.
    Delete,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandType,
    pub data: Vec<FileId>,
}

impl Command {
    #[must_use]
    pub fn nothing() -> Self {
        Self::default()
    }

    pub fn new(kind: CommandType, data: Vec<FileId>) -> Self {
        Self { kind, data }
    }
}

/// Everything the coordinator needs to admit a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub address: NetAddress,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub file_ids: Vec<FileId>,
}

/// One live connection to the coordinator.
///
/// The transport behind it is the implementor's business; the worker only
/// sees results.
#[async_trait]
pub trait MasterClient: Send + Sync {
    /// Returns the assigned worker id. Zero means the coordinator declined.
    async fn register_worker(&self, request: RegisterRequest) -> Result<WorkerId, CoordinatorError>;

    async fn worker_heartbeat(
        &self,
        worker_id: WorkerId,
        used_bytes: u64,
        removed_file_ids: &[FileId],
    ) -> Result<Command, CoordinatorError>;

    async fn cached_file(
        &self,
        worker_id: WorkerId,
        used_bytes: u64,
        file_id: FileId,
        size_bytes: u64,
    ) -> Result<(), CoordinatorError>;

    async fn add_checkpoint(
        &self,
        worker_id: WorkerId,
        file_id: FileId,
        size_bytes: u64,
        durable_path: &str,
    ) -> Result<(), CoordinatorError>;

    async fn pinned_file_ids(&self) -> Result<HashSet<FileId>, CoordinatorError>;
}

/// Opens fresh [`MasterClient`] connections.
#[async_trait]
pub trait MasterConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn MasterClient>, CoordinatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_address_display() {
        assert_eq!(NetAddress::new("worker-3", 29998).to_string(), "worker-3:29998");
    }

    #[test]
    fn test_command_defaults_to_nothing() {
        let cmd = Command::nothing();
        assert_eq!(cmd.kind, CommandType::Nothing);
        assert!(cmd.data.is_empty());
    }

    #[test]
    fn test_register_request_serializes() {
        let req = RegisterRequest {
            address: NetAddress::new("h", 1),
            capacity_bytes: 100,
            used_bytes: 30,
            file_ids: vec![1, 2],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["address"]["port"], 1);
        assert_eq!(json["file_ids"], serde_json::json!([1, 2]));
    }
}
