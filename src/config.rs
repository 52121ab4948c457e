// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the cache worker.
//!
//! # Example
//!
//! ```
//! use cache_worker::WorkerConfig;
//!
//! // Minimal config (uses defaults)
//! let config = WorkerConfig::default();
//! assert_eq!(config.capacity_bytes, 1024 * 1024 * 1024); // 1 GB
//!
//! // Override what matters for this node
//! let config = WorkerConfig {
//!     data_folder: "/mnt/ramdisk".into(),
//!     capacity_bytes: 512 * 1024 * 1024,
//!     user_timeout_ms: 30_000,
//!     ..Default::default()
//! };
//! assert_eq!(config.user_temp_folder().to_str(), Some("/mnt/ramdisk/users"));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::NetAddress;
use crate::resilience::retry::RetryConfig;

/// Configuration for a worker node.
///
/// All fields have defaults; a real deployment sets at least the coordinator
/// address, the data folder and the capacity.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Coordinator host
    #[serde(default = "default_master_host")]
    pub master_host: String,
    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// Address this worker advertises to the coordinator
    #[serde(default = "default_worker_host")]
    pub worker_host: String,
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,

    /// Local cache directory (one file per file id)
    #[serde(default = "default_data_folder")]
    pub data_folder: String,

    /// Staging area for in-progress user writes, relative to `data_folder`
    #[serde(default = "default_user_temp_relative_folder")]
    pub user_temp_relative_folder: String,

    /// Durable store folder that checkpointed files are promoted into
    #[serde(default = "default_underfs_data_folder")]
    pub underfs_data_folder: String,

    /// Durable store folder holding per-worker user staging areas
    #[serde(default = "default_underfs_workers_folder")]
    pub underfs_workers_folder: String,

    /// Cache capacity in bytes (default: 1 GB)
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,

    /// Bound on buffered access events between maintenance passes
    #[serde(default = "default_access_queue_capacity")]
    pub access_queue_capacity: usize,

    /// Bound on removals waiting for the next heartbeat; removals past it are dropped
    #[serde(default = "default_removal_queue_capacity")]
    pub removal_queue_capacity: usize,

    /// User session timeout
    #[serde(default = "default_user_timeout_ms")]
    pub user_timeout_ms: u64,

    /// Run loop timers
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    /// Registration retry delay (fixed)
    #[serde(default = "default_registration_retry_ms")]
    pub registration_retry_ms: u64,

    /// Registration attempt bound (None = retry forever)
    #[serde(default)]
    pub registration_max_retries: Option<usize>,
}

fn default_master_host() -> String { "localhost".to_string() }
fn default_master_port() -> u16 { 19998 }
fn default_worker_host() -> String { "localhost".to_string() }
fn default_worker_port() -> u16 { 29998 }
fn default_data_folder() -> String { "/mnt/ramdisk".to_string() }
fn default_user_temp_relative_folder() -> String { "users".to_string() }
fn default_underfs_data_folder() -> String { "/cache-worker/data".to_string() }
fn default_underfs_workers_folder() -> String { "/cache-worker/workers".to_string() }
fn default_capacity_bytes() -> u64 { 1024 * 1024 * 1024 } // 1 GB
fn default_access_queue_capacity() -> usize { 10_000 }
fn default_removal_queue_capacity() -> usize { 10_000 }
fn default_user_timeout_ms() -> u64 { 10_000 }
fn default_heartbeat_interval_ms() -> u64 { 1_000 }
fn default_maintenance_interval_ms() -> u64 { 1_000 }
fn default_registration_retry_ms() -> u64 { 1_000 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_host: default_master_host(),
            master_port: default_master_port(),
            worker_host: default_worker_host(),
            worker_port: default_worker_port(),
            data_folder: default_data_folder(),
            user_temp_relative_folder: default_user_temp_relative_folder(),
            underfs_data_folder: default_underfs_data_folder(),
            underfs_workers_folder: default_underfs_workers_folder(),
            capacity_bytes: default_capacity_bytes(),
            access_queue_capacity: default_access_queue_capacity(),
            removal_queue_capacity: default_removal_queue_capacity(),
            user_timeout_ms: default_user_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            registration_retry_ms: default_registration_retry_ms(),
            registration_max_retries: None,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn master_address(&self) -> NetAddress {
        NetAddress::new(self.master_host.clone(), self.master_port)
    }

    #[must_use]
    pub fn worker_address(&self) -> NetAddress {
        NetAddress::new(self.worker_host.clone(), self.worker_port)
    }

    #[must_use]
    pub fn user_temp_folder(&self) -> PathBuf {
        PathBuf::from(&self.data_folder).join(&self.user_temp_relative_folder)
    }

    /// Retry policy for coordinator registration.
    #[must_use]
    pub fn registration_retry(&self) -> RetryConfig {
        RetryConfig::fixed(
            Duration::from_millis(self.registration_retry_ms),
            self.registration_max_retries,
        )
    }
}
