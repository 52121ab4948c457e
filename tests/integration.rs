//! Integration tests for the cache worker.
//!
//! Each test runs a real [`WorkerHandler`] over a temporary data folder, an
//! [`InMemoryMaster`] coordinator and an [`InMemoryUnderFs`] durable store.
//!
//! # Running
//! ```bash
//! cargo test --test integration
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use cache_worker::coordinator::{Command, CommandType, InMemoryConnector, InMemoryMaster};
use cache_worker::storage::memory::InMemoryUnderFs;
use cache_worker::{
    CommandOutcome, FileId, ManualClock, UserId, WorkerConfig, WorkerError, WorkerHandler, WorkerState,
};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    master: Arc<InMemoryMaster>,
    ufs: Arc<InMemoryUnderFs>,
    worker: Arc<WorkerHandler>,
}

fn test_config(root: &Path, capacity_bytes: u64) -> WorkerConfig {
    WorkerConfig {
        data_folder: root.join("data").to_string_lossy().into_owned(),
        underfs_data_folder: "/ufs/data".into(),
        underfs_workers_folder: "/ufs/workers".into(),
        capacity_bytes,
        access_queue_capacity: 4,
        user_timeout_ms: 1_000,
        heartbeat_interval_ms: 10,
        maintenance_interval_ms: 10,
        registration_retry_ms: 1,
        registration_max_retries: Some(3),
        ..Default::default()
    }
}

fn build(dir: TempDir, capacity_bytes: u64) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let master = Arc::new(InMemoryMaster::new());
    let ufs = Arc::new(InMemoryUnderFs::new());
    let worker = Arc::new(WorkerHandler::with_clock(
        test_config(dir.path(), capacity_bytes),
        Arc::new(InMemoryConnector::new(master.clone())),
        ufs.clone(),
        clock.clone(),
    ));
    Harness { _dir: dir, clock, master, ufs, worker }
}

async fn started(capacity_bytes: u64) -> Harness {
    let h = build(tempfile::tempdir().unwrap(), capacity_bytes);
    h.worker.initialize().await.expect("initialize failed");
    h
}

impl Harness {
    fn stage(&self, user: UserId, file: FileId, size: usize) {
        let folder = self.worker.get_user_temp_folder(user);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(file.to_string()), vec![7u8; size]).unwrap();
    }

    /// Reserve, write and commit a file for `user`.
    async fn cache(&self, user: UserId, file: FileId, size: u64) {
        assert!(self.worker.request_space(user, size).await);
        self.stage(user, file, size as usize);
        self.worker.cache_file(user, file).await.expect("cache_file failed");
    }

    fn tick(&self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
    }
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn startup_registers_empty_worker() {
    let h = started(1_000).await;

    assert_eq!(h.worker.state(), WorkerState::Running);
    assert_ne!(h.worker.worker_id(), 0);
    let info = h.master.worker(h.worker.worker_id()).unwrap();
    assert_eq!(info.capacity_bytes, 1_000);
    assert_eq!(info.used_bytes, 0);
    assert!(info.file_ids.is_empty());
}

#[tokio::test]
async fn startup_discovers_resident_files_and_wipes_staging() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(data.join("users/5")).unwrap();
    std::fs::write(data.join("3"), vec![0u8; 10]).unwrap();
    std::fs::write(data.join("7"), vec![0u8; 20]).unwrap();
    std::fs::write(data.join("notes.txt"), b"skip me").unwrap();
    std::fs::write(data.join("users/5/9"), b"half written").unwrap();

    let h = build(dir, 1_000);
    h.worker.initialize().await.unwrap();

    assert_eq!(h.worker.cached_file_ids(), vec![3, 7]);
    assert_eq!(h.worker.used_bytes(), 30);
    assert!(!data.join("users/5").exists());
    assert!(data.join("users").is_dir());

    let info = h.master.worker(h.worker.worker_id()).unwrap();
    assert_eq!(info.used_bytes, 30);
    assert_eq!(info.file_ids.len(), 2);
}

#[tokio::test]
async fn startup_fails_when_cache_exceeds_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("1"), vec![0u8; 60]).unwrap();
    std::fs::write(data.join("2"), vec![0u8; 60]).unwrap();

    let h = build(dir, 100);
    let err = h.worker.initialize().await.unwrap_err();
    assert!(matches!(err, WorkerError::SpaceExhausted { requested: 60, available: 40 }));
    assert_eq!(h.master.worker_count(), 0);
}

#[tokio::test]
async fn startup_rejects_data_path_that_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data"), b"not a folder").unwrap();

    let h = build(dir, 100);
    assert!(matches!(h.worker.initialize().await, Err(WorkerError::Config(_))));
}

// =============================================================================
// Capacity scenarios
// =============================================================================

#[tokio::test]
async fn scenario_reservations_without_evictable_files() {
    let h = started(100).await;

    assert!(h.worker.request_space(1, 60).await);
    assert_eq!(h.worker.used_bytes(), 60);

    assert!(!h.worker.request_space(2, 50).await);
    assert_eq!(h.worker.used_bytes(), 60);
    assert_eq!(h.worker.owned_bytes(2), 0);
}

#[tokio::test]
async fn scenario_failed_request_keeps_its_evictions() {
    let h = started(100).await;
    h.cache(9, 1, 30).await;
    assert!(h.worker.request_space(1, 60).await);
    assert_eq!(h.worker.used_bytes(), 90);

    assert!(!h.worker.request_space(2, 80).await);

    assert!(!h.worker.is_cached(1));
    assert!(!h.worker.cached_file_path(1).exists());
    assert_eq!(h.worker.used_bytes(), 60);
    assert_eq!(h.worker.pending_removals(), vec![1]);

    h.worker.heartbeat().await.unwrap();
    let info = h.master.worker(h.worker.worker_id()).unwrap();
    assert!(!info.file_ids.contains(&1));
    assert_eq!(info.used_bytes, 60);
    assert!(h.worker.pending_removals().is_empty());
}

#[tokio::test]
async fn scenario_locked_file_is_never_evicted_until_unlocked() {
    let h = started(100).await;
    h.cache(9, 1, 30).await;
    h.worker.lock_file(1, 5);

    for _ in 0..3 {
        assert!(!h.worker.request_space(2, 100).await);
        assert!(h.worker.is_cached(1));
    }

    h.worker.unlock_file(1, 5);
    assert!(h.worker.request_space(2, 100).await);
    assert!(!h.worker.is_cached(1));
    assert_eq!(h.worker.used_bytes(), 100);
}

#[tokio::test]
async fn scenario_pinned_file_survives_eviction() {
    let h = started(100).await;
    h.cache(9, 1, 30).await;
    h.cache(9, 2, 30).await;
    h.master.pin(1);

    assert!(h.worker.request_space(3, 60).await);
    assert!(h.worker.is_cached(1));
    assert!(!h.worker.is_cached(2));
}

#[tokio::test]
async fn scenario_session_expiry_returns_locks_and_space() {
    let h = started(100).await;
    h.cache(9, 2, 20).await;

    h.worker.user_heartbeat(1);
    h.worker.lock_file(2, 1);
    assert!(h.worker.request_space(1, 40).await);
    assert_eq!(h.worker.used_bytes(), 60);

    h.tick(500);
    h.worker.user_heartbeat(9);
    assert!(h.worker.check_status().await.expired_users.is_empty());

    h.tick(600);
    let report = h.worker.check_status().await;
    assert_eq!(report.expired_users, vec![1]);
    assert_eq!(report.released_bytes, 40);
    assert!(!h.worker.is_locked(2));
    assert_eq!(h.worker.owned_bytes(1), 0);
    assert_eq!(h.worker.used_bytes(), 20);
}

#[tokio::test]
async fn request_larger_than_capacity_evicts_nothing() {
    let h = started(100).await;
    h.cache(9, 1, 30).await;

    assert!(!h.worker.request_space(2, 101).await);
    assert!(h.worker.is_cached(1));
}

#[tokio::test]
async fn return_space_clamps_to_owned() {
    let h = started(100).await;
    assert!(h.worker.request_space(1, 30).await);

    let outcome = h.worker.return_space(1, 50);
    assert_eq!(outcome.released, 30);
    assert_eq!(outcome.excess, 20);
    assert_eq!(h.worker.used_bytes(), 0);
}

// =============================================================================
// Cache commits
// =============================================================================

#[tokio::test]
async fn cache_file_moves_reservation_onto_file() {
    let h = started(100).await;
    assert!(h.worker.request_space(1, 50).await);
    h.stage(1, 4, 30);

    h.worker.cache_file(1, 4).await.unwrap();

    assert!(h.worker.is_cached(4));
    assert!(h.worker.cached_file_path(4).exists());
    assert!(!h.worker.get_user_temp_folder(1).join("4").exists());
    assert_eq!(h.worker.owned_bytes(1), 20);
    assert_eq!(h.worker.used_bytes(), 50);
    assert!(h.master.worker(h.worker.worker_id()).unwrap().file_ids.contains(&4));
}

#[tokio::test]
async fn cache_file_tops_up_short_reservation() {
    let h = started(100).await;
    assert!(h.worker.request_space(1, 10).await);
    h.stage(1, 4, 25);

    h.worker.cache_file(1, 4).await.unwrap();

    assert_eq!(h.worker.owned_bytes(1), 0);
    assert_eq!(h.worker.used_bytes(), 25);
}

#[tokio::test]
async fn cache_file_without_space_leaves_file_staged() {
    let h = started(50).await;
    h.cache(9, 1, 30).await;
    h.worker.lock_file(1, 9);
    h.stage(2, 5, 40);

    let err = h.worker.cache_file(2, 5).await.unwrap_err();
    assert!(matches!(err, WorkerError::SpaceExhausted { .. }));
    assert!(h.worker.get_user_temp_folder(2).join("5").exists());
    assert!(!h.worker.is_cached(5));
    assert_eq!(h.worker.used_bytes(), 30);
}

#[tokio::test]
async fn cache_file_missing_staged_file_is_not_found() {
    let h = started(100).await;
    assert!(matches!(h.worker.cache_file(1, 99).await, Err(WorkerError::NotFound(_))));
}

#[tokio::test]
async fn recommit_with_other_size_is_rejected() {
    let h = started(100).await;
    h.cache(1, 4, 10).await;
    h.stage(1, 4, 11);

    let err = h.worker.cache_file(1, 4).await.unwrap_err();
    assert_eq!(err, WorkerError::SizeMismatch { id: 4, expected: 10, actual: 11 });
    assert_eq!(h.worker.used_bytes(), 10);
}

#[tokio::test]
async fn recommit_with_same_size_releases_reservation() {
    let h = started(100).await;
    h.cache(1, 4, 10).await;
    assert!(h.worker.request_space(2, 10).await);
    h.stage(2, 4, 10);

    h.worker.cache_file(2, 4).await.unwrap();
    assert_eq!(h.worker.owned_bytes(2), 0);
    assert_eq!(h.worker.used_bytes(), 10);
}

#[tokio::test]
async fn remove_file_queues_removal() {
    let h = started(100).await;
    h.cache(1, 4, 10).await;

    assert_eq!(h.worker.remove_file(4).await.unwrap(), 10);
    assert_eq!(h.worker.used_bytes(), 0);
    assert_eq!(h.worker.pending_removals(), vec![4]);
    assert!(matches!(h.worker.remove_file(4).await, Err(WorkerError::NotFound(_))));
}

#[tokio::test]
async fn recached_file_is_not_reported_removed() {
    let h = started(100).await;
    h.cache(1, 5, 10).await;
    h.worker.remove_file(5).await.unwrap();
    h.cache(1, 5, 10).await;

    assert!(h.worker.pending_removals().is_empty());
    h.worker.heartbeat().await.unwrap();

    let info = h.master.worker(h.worker.worker_id()).unwrap();
    assert_eq!(h.worker.cached_file_ids(), vec![5]);
    assert!(info.file_ids.contains(&5));
    assert!(h.worker.cached_file_path(5).exists());
}

// =============================================================================
// Access tracking
// =============================================================================

#[tokio::test]
async fn accessed_file_outlives_colder_one() {
    let h = started(60).await;
    h.cache(1, 1, 30).await;
    h.tick(10);
    h.cache(1, 2, 30).await;

    h.tick(10);
    h.worker.access_file(1).unwrap();
    let report = h.worker.check_status().await;
    assert_eq!(report.accesses_applied, 1);

    assert!(h.worker.request_space(2, 30).await);
    assert!(h.worker.is_cached(1));
    assert!(!h.worker.is_cached(2));
}

#[tokio::test]
async fn full_access_queue_drops_events() {
    let h = started(100).await;
    for id in 0..4 {
        h.worker.access_file(id).unwrap();
    }

    assert!(matches!(h.worker.access_file(9), Err(WorkerError::QueueFull(_))));

    h.worker.check_status().await;
    assert!(h.worker.access_file(9).is_ok());
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn checkpoint_promotes_and_records() {
    let h = started(100).await;
    let staged = format!("{}/11", h.worker.get_user_underfs_temp_folder(5));
    assert_eq!(staged, format!("/ufs/workers/{}/5/11", h.worker.worker_id()));
    h.ufs.put(staged.clone(), 64);

    h.worker.add_checkpoint(5, 11).await.unwrap();

    assert!(!h.ufs.contains(&staged));
    assert!(h.ufs.contains("/ufs/data/11"));
    let record = h.master.checkpoint(11).unwrap();
    assert_eq!(record.size_bytes, 64);
    assert_eq!(record.durable_path, "/ufs/data/11");
    assert_eq!(record.worker_id, h.worker.worker_id());
}

#[tokio::test]
async fn checkpoint_of_missing_file_fails() {
    let h = started(100).await;
    let err = h.worker.add_checkpoint(5, 11).await.unwrap_err();
    assert!(matches!(err, WorkerError::CheckpointFailed { file_id: 11, .. }));
    assert!(h.master.checkpoint(11).is_none());
}

// =============================================================================
// Heartbeats and commands
// =============================================================================

#[tokio::test]
async fn heartbeat_failure_keeps_removals_for_next_time() {
    let h = started(100).await;
    h.cache(1, 4, 10).await;
    h.worker.remove_file(4).await.unwrap();

    h.master.set_available(false);
    assert!(h.worker.heartbeat().await.is_err());
    assert_eq!(h.worker.pending_removals(), vec![4]);

    h.master.set_available(true);
    h.worker.heartbeat().await.unwrap();
    assert!(h.worker.pending_removals().is_empty());
    assert!(h.master.worker(h.worker.worker_id()).unwrap().file_ids.is_empty());
}

#[tokio::test]
async fn register_command_reregisters() {
    let h = started(100).await;
    h.cache(1, 4, 10).await;
    h.master.forget_worker(h.worker.worker_id());

    let command = h.worker.heartbeat().await.unwrap();
    assert_eq!(command.kind, CommandType::Register);

    let outcome = h.worker.handle_command(command).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Reregistered(id) if id == h.worker.worker_id()));
    let info = h.master.worker(h.worker.worker_id()).unwrap();
    assert!(info.file_ids.contains(&4));
}

#[tokio::test]
async fn free_command_skips_locked_files() {
    let h = started(100).await;
    h.cache(1, 4, 10).await;
    h.cache(1, 5, 10).await;
    h.worker.lock_file(5, 1);
    h.master.queue_command(Command::new(CommandType::Free, vec![4, 5, 6]));

    let command = h.worker.heartbeat().await.unwrap();
    let outcome = h.worker.handle_command(command).await.unwrap();

    assert_eq!(outcome, CommandOutcome::Freed(vec![4]));
    assert_eq!(h.worker.cached_file_ids(), vec![5]);
    assert!(!h.worker.cached_file_path(4).exists());
}

#[tokio::test]
async fn run_loop_heartbeats_until_shutdown() {
    let h = started(100).await;
    let (tx, rx) = watch::channel(false);
    let runner = h.worker.clone();
    let handle = tokio::spawn(async move { runner.run(rx).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(h.master.heartbeat_count() > 0);
    assert_eq!(h.worker.state(), WorkerState::ShuttingDown);
}
