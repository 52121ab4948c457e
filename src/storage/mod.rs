// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local storage bookkeeping and the storage collaborators around it.
//!
//! - [`catalog`]: which files are resident, their sizes and access times
//! - [`local`]: the on-disk cache folder and a local-path durable store
//! - [`traits`]: the durable store interface used for checkpoints
//! - [`memory`]: in-memory durable store

pub mod catalog;
pub mod local;
pub mod memory;
pub mod traits;
