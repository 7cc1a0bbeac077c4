//! End-to-end scenario tests driving the sync engine, deletion queue, and
//! smart-protection gate directly, the way an execution wrapper composes
//! them, without going through the scheduler's ticker/dispatch machinery or
//! the HTTP control plane.

use service::database::{CacheEntry, Database, SyncStatus};
use service::deletion;
use service::smart_protection::ProtectionGate;
use service::sync_engine;
use shared::config::{
    DeletionPolicy, ExtensionFilter, RuleFlags, ScheduleDescriptor, SizeFilter, SyncTaskConfig,
    TaskStatus, TimeBase,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn open_db(dir: &std::path::Path) -> Database {
    let mut db = Database::new(dir, 5).unwrap();
    db.initialize().unwrap();
    db
}

fn sync_task(source_path: PathBuf, target_path: PathBuf, deletion_policy: DeletionPolicy) -> SyncTaskConfig {
    SyncTaskConfig {
        id: Uuid::new_v4(),
        name: "scenario-task".to_string(),
        source_path,
        target_path,
        schedule: ScheduleDescriptor::Interval { seconds: 60 },
        enabled: true,
        status: TaskStatus::Idle,
        last_run: None,
        rules: RuleFlags {
            sync_if_absent: true,
            ..Default::default()
        },
        workers: 1,
        slow_storage: false,
        size_filter: SizeFilter::default(),
        extension_filter: ExtensionFilter::default(),
        deletion_policy,
        retry_count: 2,
    }
}

/// Mirrors the scheduler's `on_outcome` closure: persists a file outcome
/// into the cache and, on success, enqueues a deferred delete if the task's
/// policy asks for one.
fn persist_outcome(
    db: &Mutex<Database>,
    task_id: Uuid,
    policy: &DeletionPolicy,
    outcome: sync_engine::FileOutcome,
) {
    let status = match outcome.outcome {
        sync_engine::Outcome::Success | sync_engine::Outcome::SkippedUnchanged => SyncStatus::Synced,
        sync_engine::Outcome::Failed => SyncStatus::Failed,
        _ => return,
    };
    let now = shared::utils::current_timestamp();
    let entry = CacheEntry {
        source_path: outcome.source.to_string_lossy().to_string(),
        target_path: outcome.target.to_string_lossy().to_string(),
        size: outcome.size,
        mtime: outcome.mtime,
        hash: None,
        hash_at: None,
        sync_status: status,
        synced_at: if status == SyncStatus::Synced { Some(now) } else { None },
        deleted_at: None,
        last_seen_at: now,
        last_error: outcome.error.clone(),
        metadata: None,
    };

    let mut db = db.lock().unwrap();
    db.upsert_cache_entry(task_id, &entry).unwrap();
    if status == SyncStatus::Synced {
        deletion::enqueue_if_enabled(&mut db, task_id, &outcome.source, policy, now).unwrap();
    }
}

#[tokio::test]
async fn test_basic_sync_copies_new_file_and_marks_cache_synced() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    let source_file = source_dir.path().join("a.mkv");
    tokio::fs::write(&source_file, vec![0u8; 1024]).await.unwrap();

    let task = sync_task(
        source_dir.path().to_path_buf(),
        target_dir.path().to_path_buf(),
        DeletionPolicy::default(),
    );
    let task_id = task.id;

    let db = Arc::new(Mutex::new(open_db(db_dir.path())));
    let db_for_outcome = db.clone();
    let policy = task.deletion_policy.clone();
    let stats = sync_engine::run(&task, move |outcome| {
        persist_outcome(&db_for_outcome, task_id, &policy, outcome)
    })
    .await
    .unwrap();

    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
    assert!(target_dir.path().join("a.mkv").exists());

    let mut db = db.lock().unwrap();
    assert!(db
        .is_file_synced(task_id, &source_file.to_string_lossy())
        .unwrap());
    assert_eq!(db.deletion_queue_depth().unwrap(), 0);
}

#[tokio::test]
async fn test_delayed_deletion_drains_source_in_post_run_sweep() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    let source_file = source_dir.path().join("a.mkv");
    tokio::fs::write(&source_file, vec![0u8; 1024]).await.unwrap();

    let policy = DeletionPolicy {
        enabled: true,
        delay_days: 0,
        time_base: TimeBase::SyncComplete,
        delete_parent: false,
        parent_levels: 0,
        force_delete_non_empty: false,
    };
    let task = sync_task(
        source_dir.path().to_path_buf(),
        target_dir.path().to_path_buf(),
        policy,
    );
    let task_id = task.id;

    let db = Arc::new(Mutex::new(open_db(db_dir.path())));
    let db_for_outcome = db.clone();
    let run_policy = task.deletion_policy.clone();
    sync_engine::run(&task, move |outcome| {
        persist_outcome(&db_for_outcome, task_id, &run_policy, outcome)
    })
    .await
    .unwrap();

    assert!(source_file.exists());

    let now = shared::utils::current_timestamp();
    let mut db = db.lock().unwrap();
    assert_eq!(db.deletion_queue_depth().unwrap(), 1);

    let result = deletion::discharge(
        &mut db,
        task_id,
        &task.name,
        &task.source_path,
        now,
        100,
    )
    .unwrap();

    assert_eq!(result.deleted, vec![source_file.clone()]);
    assert!(!source_file.exists());
    assert_eq!(db.deletion_queue_depth().unwrap(), 0);

    let history = db.recent_history_for_task(task_id, 10).unwrap();
    assert!(history.iter().any(|h| h.result == "DELETED"));
}

#[tokio::test]
async fn test_parent_pruning_stops_at_source_root() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    let show_dir = source_dir.path().join("Show").join("S01");
    tokio::fs::create_dir_all(&show_dir).await.unwrap();
    let episode = show_dir.join("ep.mkv");
    tokio::fs::write(&episode, vec![0u8; 512]).await.unwrap();

    let policy = DeletionPolicy {
        enabled: true,
        delay_days: 0,
        time_base: TimeBase::SyncComplete,
        delete_parent: true,
        parent_levels: 2,
        force_delete_non_empty: false,
    };
    let task = sync_task(
        source_dir.path().to_path_buf(),
        target_dir.path().to_path_buf(),
        policy,
    );
    let task_id = task.id;

    let db = Arc::new(Mutex::new(open_db(db_dir.path())));
    let db_for_outcome = db.clone();
    let run_policy = task.deletion_policy.clone();
    sync_engine::run(&task, move |outcome| {
        persist_outcome(&db_for_outcome, task_id, &run_policy, outcome)
    })
    .await
    .unwrap();

    let now = shared::utils::current_timestamp();
    let mut db = db.lock().unwrap();
    let result = deletion::discharge(&mut db, task_id, &task.name, &task.source_path, now, 100).unwrap();
    assert_eq!(result.deleted, vec![episode.clone()]);

    let pruned = deletion::prune_ancestors(
        &mut db,
        task_id,
        &result.deleted,
        &task.source_path,
        &task.deletion_policy,
    )
    .unwrap();

    assert_eq!(pruned.len(), 2);
    assert!(!source_dir.path().join("Show").join("S01").exists());
    assert!(!source_dir.path().join("Show").exists());
    assert!(source_dir.path().exists());
}

#[test]
fn test_smart_protection_withholds_large_orphan_set_then_approves_after_grace_scans() {
    let dir = tempfile::tempdir().unwrap();
    let mut gate = ProtectionGate::load(dir.path(), 100, 3).unwrap();
    let orphans: HashSet<String> = (0..150).map(|i| format!("orphan_{i}.stub")).collect();

    // Remote listing healthy: nothing missing yet.
    assert!(gate.process(&HashSet::new(), &orphans).unwrap().is_empty());

    // Two consecutive misses stay below the grace-scan threshold.
    assert!(gate.process(&orphans, &HashSet::new()).unwrap().is_empty());
    assert!(gate.process(&orphans, &HashSet::new()).unwrap().is_empty());

    // Third consecutive miss clears the grace period; the whole set is approved.
    let approved = gate.process(&orphans, &HashSet::new()).unwrap();
    assert_eq!(approved, orphans);
    assert!(gate.stats().is_empty());

    // Listing recovers: nothing left to track.
    assert!(gate.process(&HashSet::new(), &orphans).unwrap().is_empty());
    assert!(gate.stats().is_empty());
}

#[test]
fn test_smart_protection_mid_run_reappearance_only_resets_affected_half() {
    let dir = tempfile::tempdir().unwrap();
    let mut gate = ProtectionGate::load(dir.path(), 100, 3).unwrap();
    let all: Vec<String> = (0..150).map(|i| format!("orphan_{i}.stub")).collect();

    // First miss: whole set goes missing.
    assert!(gate
        .process(&all.iter().cloned().collect(), &HashSet::new())
        .unwrap()
        .is_empty());

    let (reappeared_slice, missing_slice) = all.split_at(all.len() / 2);
    let reappeared: HashSet<String> = reappeared_slice.iter().cloned().collect();
    let missing: HashSet<String> = missing_slice.iter().cloned().collect();

    // Second scan: half the paths come back.
    let ready = gate.process(&missing, &reappeared).unwrap();
    assert!(ready.is_empty());
    for path in &reappeared {
        assert_eq!(gate.stats().get(path), None);
    }
    for path in &missing {
        assert_eq!(gate.stats().get(path), Some(&2));
    }

    // Third consecutive miss for the still-missing half reaches grace_scans.
    let ready = gate.process(&missing, &HashSet::new()).unwrap();
    assert_eq!(ready, missing);
    assert!(gate.stats().is_empty());
}
