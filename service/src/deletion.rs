//! Deferred deletion subsystem (§4.4): matures delete records for a task's
//! synced source files and prunes empty ancestor directories under strict
//! safety predicates.

use crate::database::Database;
use anyhow::{Context, Result};
use shared::config::{DeletionPolicy, TimeBase};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Compute the mature-at timestamp for a newly produced SUCCESS or
/// SKIPPED_UNCHANGED outcome (§4.4 "Enqueue").
pub fn mature_at(policy: &DeletionPolicy, now: i64, source_created_at: i64) -> i64 {
    let base = match policy.time_base {
        TimeBase::SyncComplete => now,
        TimeBase::FileCreate => source_created_at,
    };
    let delay_secs = policy.delay_days.max(0) * 86_400;
    base + delay_secs
}

/// Enqueue a delete record for a just-synced file, if the task's deletion
/// policy is enabled.
pub fn enqueue_if_enabled(
    db: &mut Database,
    task_id: Uuid,
    source_path: &Path,
    policy: &DeletionPolicy,
    now: i64,
) -> Result<()> {
    if !policy.enabled {
        return Ok(());
    }

    let created_at = std::fs::metadata(source_path)
        .and_then(|m| m.created())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(now);

    let eligible_at = mature_at(policy, now, created_at);
    db.enqueue_deletion(task_id, &source_path.to_string_lossy(), now, eligible_at)
}

/// Cancel a pending delete record, used when a source file reappears after
/// having been marked for deletion (stub-style reinstatement).
pub fn cancel(db: &mut Database, task_id: Uuid, source_path: &Path) -> Result<()> {
    db.cancel_deletion(task_id, &source_path.to_string_lossy())
}

/// Outcome of a single discharge pass, used by the dispatch wrapper to
/// decide whether to run directory pruning.
#[derive(Debug, Default)]
pub struct DischargeResult {
    pub deleted: Vec<PathBuf>,
    pub retried: usize,
}

/// Drain mature delete records for `task_id` (§4.4 "Discharge").
pub fn discharge(
    db: &mut Database,
    task_id: Uuid,
    task_name: &str,
    source_root: &Path,
    now: i64,
    limit: usize,
) -> Result<DischargeResult> {
    let due = db.due_deletions(now, limit)?;
    let mut result = DischargeResult::default();

    for record in due {
        if record.task_id != task_id {
            continue;
        }
        let path = PathBuf::from(&record.source_path);

        // Verification guard: only delete files the cache positively marked SYNCED.
        if !db.is_file_synced(task_id, &record.source_path)? {
            debug!(path = %path.display(), "skipping delete: cache does not report SYNCED");
            continue;
        }

        if !path.exists() {
            db.discharge_deletion(record.id)?;
            continue;
        }

        let remove_result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };

        match remove_result {
            Ok(()) => {
                db.update_sync_status(task_id, &record.source_path, crate::database::SyncStatus::Deleted, now)?;
                db.record_event_history(task_id, task_name, now, "DELETED", Some(&record.source_path))?;
                db.discharge_deletion(record.id)?;
                result.deleted.push(path);
            }
            Err(e) => {
                warn!(path = %record.source_path, error = %e, "deferred delete failed, will retry");
                db.mark_deletion_failed(record.id, now, &e.to_string())?;
                result.retried += 1;
            }
        }
    }

    let _ = source_root;
    Ok(result)
}

/// Prune empty ancestor directories above the files deleted in one
/// discharge pass (§4.4 "Directory pruning"). Only runs when the task
/// requests it.
pub fn prune_ancestors(
    db: &mut Database,
    task_id: Uuid,
    deleted: &[PathBuf],
    source_root: &Path,
    policy: &DeletionPolicy,
) -> Result<Vec<PathBuf>> {
    if !policy.delete_parent || policy.parent_levels == 0 {
        return Ok(Vec::new());
    }

    let home = dirs_home();
    let source_root_real = std::fs::canonicalize(source_root).unwrap_or_else(|_| source_root.to_path_buf());

    let pending_sources: HashSet<PathBuf> = db
        .list_deletions(10_000)
        .context("failed to list pending delete records for pruning guard")?
        .into_iter()
        .map(|r| PathBuf::from(r.source_path))
        .collect();

    let mut visited = HashSet::new();
    let mut pruned = Vec::new();

    for file in deleted {
        let mut current = file.parent().map(|p| p.to_path_buf());

        for _ in 0..policy.parent_levels {
            let Some(dir) = current.clone() else { break };
            if visited.contains(&dir) {
                break;
            }

            if !candidate_ok(&dir, &source_root_real, home.as_deref(), &pending_sources, policy) {
                break;
            }

            match std::fs::remove_dir(&dir) {
                Ok(()) => {
                    visited.insert(dir.clone());
                    pruned.push(dir.clone());
                    current = dir.parent().map(|p| p.to_path_buf());
                }
                Err(_) => break,
            }
        }
    }

    let _ = task_id;
    Ok(pruned)
}

fn candidate_ok(
    dir: &Path,
    source_root_real: &Path,
    home: Option<&Path>,
    pending_sources: &HashSet<PathBuf>,
    policy: &DeletionPolicy,
) -> bool {
    if !dir.exists() {
        return false;
    }

    let dir_real = match std::fs::canonicalize(dir) {
        Ok(p) => p,
        Err(_) => return false,
    };

    if dir_real == Path::new("/") {
        return false;
    }
    if let Some(home) = home {
        if dir_real == home {
            return false;
        }
    }
    if dir_real == source_root_real {
        return false;
    }
    if !dir_real.starts_with(source_root_real) {
        return false;
    }

    if pending_sources.iter().any(|p| p.starts_with(&dir_real) || p.starts_with(dir)) {
        return false;
    }

    if !policy.force_delete_non_empty {
        match std::fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }

    true
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::DeletionPolicy;

    fn policy(enabled: bool, delay_days: i64, delete_parent: bool, parent_levels: u32) -> DeletionPolicy {
        DeletionPolicy {
            enabled,
            delay_days,
            time_base: TimeBase::SyncComplete,
            delete_parent,
            parent_levels,
            force_delete_non_empty: false,
        }
    }

    #[test]
    fn test_mature_at_sync_complete_zero_delay() {
        let p = policy(true, 0, false, 0);
        assert_eq!(mature_at(&p, 1000, 0), 1000);
    }

    #[test]
    fn test_mature_at_adds_days() {
        let p = policy(true, 2, false, 0);
        assert_eq!(mature_at(&p, 1000, 0), 1000 + 2 * 86_400);
    }

    #[test]
    fn test_mature_at_negative_delay_clamps_to_zero() {
        let p = policy(true, -5, false, 0);
        assert_eq!(mature_at(&p, 1000, 0), 1000);
    }

    #[test]
    fn test_candidate_ok_rejects_source_root_itself() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let p = policy(true, 0, true, 2);
        let pending = HashSet::new();
        assert!(!candidate_ok(&root, &root, None, &pending, &p));
    }

    #[test]
    fn test_candidate_ok_rejects_non_empty_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let sub = root.join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("keep.txt"), b"x").unwrap();

        let p = policy(true, 0, true, 1);
        let pending = HashSet::new();
        assert!(!candidate_ok(&sub, &root, None, &pending, &p));
    }

    #[test]
    fn test_candidate_ok_rejects_when_pending_records_under_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let sub = root.join("sub");
        std::fs::create_dir(&sub).unwrap();

        let p = policy(true, 0, true, 1);
        let mut pending = HashSet::new();
        pending.insert(sub.join("future.mkv"));
        assert!(!candidate_ok(&sub, &root, None, &pending, &p));
    }
}
