// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator sync agent.
//!
//! Owns the live connection to the coordinator. Registration retries under
//! its own policy until the coordinator hands out an id; every other call is
//! a single attempt through the circuit breaker, since steady-state
//! reconciliation happens on the next heartbeat anyway.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::traits::{Command, CoordinatorError, MasterClient, MasterConnector, RegisterRequest};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
use crate::resilience::retry::{retry, RetryConfig};
use crate::{FileId, WorkerId};

pub struct CoordinatorSyncAgent {
    connector: Arc<dyn MasterConnector>,
    client: RwLock<Option<Arc<dyn MasterClient>>>,
    registration_retry: RetryConfig,
    breaker: CircuitBreaker,
}

impl CoordinatorSyncAgent {
    pub fn new(connector: Arc<dyn MasterConnector>, registration_retry: RetryConfig) -> Self {
        Self::with_circuit(connector, registration_retry, CircuitConfig::default())
    }

    pub fn with_circuit(
        connector: Arc<dyn MasterConnector>,
        registration_retry: RetryConfig,
        circuit: CircuitConfig,
    ) -> Self {
        Self {
            connector,
            client: RwLock::new(None),
            registration_retry,
            breaker: CircuitBreaker::new("coordinator", circuit),
        }
    }

    /// Register this worker, retrying until the coordinator assigns an id or
    /// the retry policy gives up.
    ///
    /// A returned id of zero counts as a failed attempt.
    #[tracing::instrument(skip(self, request), fields(address = %request.address))]
    pub async fn register(&self, request: RegisterRequest) -> Result<WorkerId, CoordinatorError> {
        let result = retry("register_worker", &self.registration_retry, || {
            let request = request.clone();
            async move {
                let client = self.client().await?;
                match client.register_worker(request).await {
                    Ok(0) => Err(CoordinatorError::Rejected("coordinator returned worker id 0".to_string())),
                    Ok(id) => Ok(id),
                    Err(e) => {
                        self.drop_connection();
                        Err(e)
                    }
                }
            }
        })
        .await;

        match &result {
            Ok(id) => {
                crate::metrics::record_coordinator_call("register", "success");
                info!(worker_id = id, "Registered with coordinator");
            }
            Err(e) => {
                crate::metrics::record_coordinator_call("register", "error");
                warn!(error = %e, "Registration gave up");
            }
        }
        result
    }

    /// Report usage and removals; returns the coordinator's instruction.
    pub async fn heartbeat(
        &self,
        worker_id: WorkerId,
        used_bytes: u64,
        removed: &[FileId],
    ) -> Result<Command, CoordinatorError> {
        self.guarded("heartbeat", move |client| async move {
            client.worker_heartbeat(worker_id, used_bytes, removed).await
        })
        .await
    }

    /// Tell the coordinator `file_id` is now resident here.
    pub async fn notify_cached(
        &self,
        worker_id: WorkerId,
        used_bytes: u64,
        file_id: FileId,
        size_bytes: u64,
    ) -> Result<(), CoordinatorError> {
        self.guarded("cached_file", move |client| async move {
            client.cached_file(worker_id, used_bytes, file_id, size_bytes).await
        })
        .await
    }

    pub async fn finalize_checkpoint(
        &self,
        worker_id: WorkerId,
        file_id: FileId,
        size_bytes: u64,
        durable_path: &str,
    ) -> Result<(), CoordinatorError> {
        self.guarded("add_checkpoint", move |client| async move {
            client.add_checkpoint(worker_id, file_id, size_bytes, durable_path).await
        })
        .await
    }

    /// Files the coordinator wants kept. Callers fail open on error.
    pub async fn fetch_pinned_ids(&self) -> Result<HashSet<FileId>, CoordinatorError> {
        self.guarded("pinned_file_ids", |client| async move { client.pinned_file_ids().await })
            .await
    }

    /// Replace the live connection with a fresh one.
    ///
    /// If the new connection cannot be opened the old one is still dropped,
    /// and the next call reconnects lazily.
    pub async fn reset_connection(&self) -> Result<(), CoordinatorError> {
        self.drop_connection();
        let fresh = self.connector.connect().await?;
        *self.client.write() = Some(fresh);
        info!("Coordinator connection reset");
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn client(&self) -> Result<Arc<dyn MasterClient>, CoordinatorError> {
        let cached = self.client.read().clone();
        if let Some(client) = cached {
            return Ok(client);
        }

        let fresh = self.connector.connect().await?;
        debug!("Opened coordinator connection");
        *self.client.write() = Some(fresh.clone());
        Ok(fresh)
    }

    fn drop_connection(&self) {
        self.client.write().take();
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, CoordinatorError>
    where
        F: FnOnce(Arc<dyn MasterClient>) -> Fut,
        Fut: Future<Output = Result<T, CoordinatorError>>,
    {
        let result = self
            .breaker
            .call(|| async move {
                let client = self.client().await?;
                f(client).await
            })
            .await;

        match result {
            Ok(value) => {
                crate::metrics::record_coordinator_call(operation, "success");
                Ok(value)
            }
            Err(CircuitError::Rejected) => {
                crate::metrics::record_coordinator_call(operation, "rejected");
                Err(CoordinatorError::CircuitOpen)
            }
            Err(CircuitError::Inner(e)) => {
                crate::metrics::record_coordinator_call(operation, "error");
                debug!(operation, error = %e, "Coordinator call failed");
                Err(e)
            }
        }
    }
}
