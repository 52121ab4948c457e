// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience helpers for talking to the coordinator.
//!
//! - [`retry`]: backoff policy and retry loop (registration)
//! - [`circuit_breaker`]: fail-fast wrapper for steady-state coordinator calls

pub mod circuit_breaker;
pub mod retry;
