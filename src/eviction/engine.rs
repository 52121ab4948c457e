// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorSyncAgent;
use crate::node::{FileIoGuard, SharedNode};
use crate::storage::local::LocalCacheDir;

/// Frees one least recently used, unlocked, unpinned file per call.
pub struct EvictionEngine {
    node: SharedNode,
    agent: Arc<CoordinatorSyncAgent>,
    cache_dir: LocalCacheDir,
}

impl EvictionEngine {
    pub fn new(node: SharedNode, agent: Arc<CoordinatorSyncAgent>, cache_dir: LocalCacheDir) -> Self {
        Self { node, agent, cache_dir }
    }

    /// Evict a single file. Returns `false` when nothing is evictable.
    ///
    /// The pin set is fetched fresh on every call. If the fetch fails the
    /// set is treated as empty for this call only.
    pub async fn evict_one(&self) -> bool {
        let pinned = match self.agent.fetch_pinned_ids().await {
            Ok(pinned) => {
                crate::metrics::record_pin_fetch("ok");
                pinned
            }
            Err(e) => {
                warn!(error = %e, "Pin set unavailable, evicting without it");
                crate::metrics::record_pin_fetch("failed_open");
                HashSet::new()
            }
        };

        let evicted = {
            let mut node = self.node.lock();
            let evicted = node.evict_candidate(&pinned);
            node.publish_gauges();
            evicted
        };

        let Some((file_id, size_bytes)) = evicted else {
            debug!(pinned = pinned.len(), "No eviction candidate");
            crate::metrics::record_eviction_exhausted();
            return false;
        };

        let _deleting = FileIoGuard::deleting(&self.node, file_id);
        if let Err(e) = self.cache_dir.delete(file_id).await {
            warn!(file_id, error = %e, "Failed to delete evicted file from local cache");
        }

        info!(file_id, size_bytes, "Evicted file");
        crate::metrics::record_eviction(size_bytes);
        true
    }
}
