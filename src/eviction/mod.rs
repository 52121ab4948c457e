// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction of cold files from the local cache.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  lru.rs     - Victim selection                               │
//! │  └─ select_victim: oldest access time, smallest id on ties   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  engine.rs  - One eviction per call                          │
//! │  └─ EvictionEngine: pin fetch (fail-open), select + remove   │
//! │     under the node lock, physical delete after unlocking     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers needing more space call [`EvictionEngine::evict_one`] repeatedly
//! until their reservation fits or it returns `false`. Evictions done along
//! the way are not rolled back if the reservation still fails.

pub mod engine;
pub mod lru;

pub use engine::EvictionEngine;
