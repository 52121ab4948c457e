// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic cache-worker usage example.
//!
//! Demonstrates:
//! 1. Loading a worker config from JSON
//! 2. Starting a worker against an in-memory coordinator
//! 3. Reserving space, staging and committing files
//! 4. Eviction under pressure, with a locked and a pinned file
//! 5. A checkpoint into the durable store
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_worker
//! ```

use std::sync::Arc;
use std::time::Duration;

use cache_worker::coordinator::{InMemoryConnector, InMemoryMaster};
use cache_worker::storage::memory::InMemoryUnderFs;
use cache_worker::{WorkerConfig, WorkerHandler};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           cache-worker: Basic Worker Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the worker
    // ─────────────────────────────────────────────────────────────────────────
    let data_folder = std::env::temp_dir().join(format!("cache-worker-demo-{}", std::process::id()));
    let raw = serde_json::json!({
        "data_folder": data_folder.to_string_lossy(),
        "capacity_bytes": 4096,
        "heartbeat_interval_ms": 100,
        "maintenance_interval_ms": 100,
        "user_timeout_ms": 2000,
    });
    let config: WorkerConfig = serde_json::from_value(raw)?;
    println!("📦 Config: capacity {} bytes, data in {}", config.capacity_bytes, config.data_folder);

    let master = Arc::new(InMemoryMaster::new());
    let durable = Arc::new(InMemoryUnderFs::new());
    let worker = Arc::new(WorkerHandler::new(
        config,
        Arc::new(InMemoryConnector::new(master.clone())),
        durable.clone(),
    ));

    let worker_id = worker.initialize().await?;
    println!("   ✅ Registered as worker {} ({})", worker_id, worker.state());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = worker.clone();
    let run_handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Cache a few files for user 7
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Caching files for user 7...");
    let user = 7;
    for (file_id, size) in [(1u64, 1024usize), (2, 1024), (3, 1024)] {
        if !worker.request_space(user, size as u64).await {
            println!("   └─ No room for file {}", file_id);
            continue;
        }
        let staged = worker.get_user_temp_folder(user);
        tokio::fs::create_dir_all(&staged).await?;
        tokio::fs::write(staged.join(file_id.to_string()), vec![0u8; size]).await?;
        worker.cache_file(user, file_id).await?;
        println!("   └─ Cached file {} ({} bytes), used {}", file_id, size, worker.used_bytes());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Eviction under pressure
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Requesting 2048 bytes for user 8 with file 1 locked and file 2 pinned...");
    worker.lock_file(1, user);
    master.pin(2);
    let granted = worker.request_space(8, 2048).await;
    println!("   └─ Granted: {}", granted);
    println!("   └─ Resident files: {:?}", worker.cached_file_ids());
    println!("   └─ Pending removals: {:?}", worker.pending_removals());
    worker.unlock_file(1, user);
    let outcome = worker.return_space(8, 2048);
    println!("   └─ Returned {} bytes", outcome.released);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Checkpoint
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n💾 Checkpointing file 42...");
    let staged = format!("{}/42", worker.get_user_underfs_temp_folder(user));
    durable.put(staged, 512);
    worker.add_checkpoint(user, 42).await?;
    if let Some(record) = master.checkpoint(42) {
        println!("   └─ Coordinator recorded {} bytes at {}", record.size_bytes, record.durable_path);
    }

    // Let a heartbeat report the evictions
    tokio::time::sleep(Duration::from_millis(250)).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    shutdown_tx.send(true)?;
    run_handle.await?;
    println!("   ✅ Shutdown complete! State: {}", worker.state());

    if let Err(e) = std::fs::remove_dir_all(&data_folder) {
        println!("   └─ Warning: could not remove {}: {}", data_folder.display(), e);
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.0}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("   │  └─ {} count={} avg={:.6}", name, count, avg);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
