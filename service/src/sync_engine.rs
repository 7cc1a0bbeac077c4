//! Sync engine: materializes one sync task's source tree into its target
//! tree (§4.2).
//!
//! A task's execution wrapper (`scheduler.rs`) owns the delete-queue drain
//! around a run; this module only produces per-file outcomes and leaves the
//! source file alone. Deletion, if enabled, happens later via the outcome
//! callback enqueuing a deferred-delete record.

use anyhow::{Context, Result};
use shared::config::SyncTaskConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-file outcome vocabulary (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    SkippedIgnored,
    SkippedFiltered,
    SkippedUnchanged,
    SkippedActive,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::SkippedIgnored => "SKIPPED_IGNORED",
            Outcome::SkippedFiltered => "SKIPPED_FILTERED",
            Outcome::SkippedUnchanged => "SKIPPED_UNCHANGED",
            Outcome::SkippedActive => "SKIPPED_ACTIVE",
            Outcome::Failed => "FAILED",
        }
    }
}

/// Running counters for one sync run (§4.2 "Stats").
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub total: u64,
    pub success: u64,
    pub skipped_ignored: u64,
    pub skipped_active: u64,
    pub skipped_unchanged: u64,
    pub skipped_filtered: u64,
    pub failed: u64,
}

impl SyncStats {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::SkippedIgnored => self.skipped_ignored += 1,
            Outcome::SkippedFiltered => self.skipped_filtered += 1,
            Outcome::SkippedUnchanged => self.skipped_unchanged += 1,
            Outcome::SkippedActive => self.skipped_active += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn percent_done(&self, planned_total: u64) -> f64 {
        if planned_total == 0 {
            100.0
        } else {
            (self.total as f64 / planned_total as f64) * 100.0
        }
    }
}

/// One completed per-file outcome, handed to the caller's result callback.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub target: PathBuf,
    pub outcome: Outcome,
    pub size: u64,
    pub mtime: i64,
    pub error: Option<String>,
}

/// Drive one full run of the sync engine for `task`, calling `on_outcome`
/// once per file. Returns the run's aggregate stats.
pub async fn run<F>(task: &SyncTaskConfig, on_outcome: F) -> Result<SyncStats>
where
    F: Fn(FileOutcome) + Send + Sync + 'static,
{
    clean_stale_temp_files(&task.target_path);

    if !task.source_path.is_dir() {
        anyhow::bail!("source path is not a directory: {}", task.source_path.display());
    }
    std::fs::create_dir_all(&task.target_path).with_context(|| {
        format!("failed to create target directory: {}", task.target_path.display())
    })?;

    let pairs = enumerate(&task.source_path, &task.target_path, task)?;
    let stats = Arc::new(std::sync::Mutex::new(SyncStats::default()));
    let on_outcome = Arc::new(on_outcome);
    let workers = task.effective_workers().max(1);

    if workers == 1 {
        for (source, target) in pairs {
            let outcome = process_one(&source, &target, task).await;
            stats.lock().unwrap().record(outcome.outcome);
            on_outcome(outcome);
        }
    } else {
        let semaphore = Arc::new(Semaphore::new(workers as usize));
        let mut joins = JoinSet::new();

        for (source, target) in pairs {
            let permit = semaphore.clone().acquire_owned().await?;
            let task = task.clone();
            let stats = stats.clone();
            let on_outcome = on_outcome.clone();

            joins.spawn(async move {
                let _permit = permit;
                let outcome = process_one(&source, &target, &task).await;
                stats.lock().unwrap().record(outcome.outcome);
                on_outcome(outcome);
            });
        }

        while joins.join_next().await.is_some() {}
    }

    let stats = Arc::try_unwrap(stats)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();
    Ok(stats)
}

/// Remove stale `.tmp_*` siblings left behind by an interrupted prior run
/// (§4.2 Phase 0). Best-effort; failures are logged only.
fn clean_stale_temp_files(target_root: &Path) {
    if !target_root.exists() {
        return;
    }
    for entry in WalkDir::new(target_root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(".tmp_") {
                    if let Err(e) = std::fs::remove_file(entry.path()) {
                        warn!(path = %entry.path().display(), error = %e, "failed to remove stale temp file");
                    }
                }
            }
        }
    }
}

/// Walk `source` recursively, pairing each regular file with its candidate
/// target path (§4.2 Phase 1).
fn enumerate(
    source: &Path,
    target_root: &Path,
    task: &SyncTaskConfig,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut pairs = Vec::new();

    for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path())
            .to_path_buf();
        let target = target_root.join(&relative);
        pairs.push((entry.path().to_path_buf(), target));
    }

    let _ = task;
    Ok(pairs)
}

/// Run the full per-file algorithm (§4.2 "Per-file algorithm") for one pair.
async fn process_one(source: &Path, target: &Path, task: &SyncTaskConfig) -> FileOutcome {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if shared::utils::is_ignored_name(name) {
        return skip(source, target, Outcome::SkippedIgnored);
    }

    let extension = shared::utils::lowercase_extension(name);
    if !task.extension_filter.passes(extension.as_deref()) {
        return skip(source, target, Outcome::SkippedFiltered);
    }

    let metadata = match tokio::fs::metadata(source).await {
        Ok(m) => m,
        Err(e) => return fail(source, target, format!("stat failed: {}", e)),
    };

    if !task.size_filter.passes(metadata.len()) {
        return skip(source, target, Outcome::SkippedFiltered);
    }

    if !needs_sync(source, target, &task.rules).await {
        return skip(source, target, Outcome::SkippedUnchanged);
    }

    let stable_size = match check_stability(source, metadata.len()).await {
        Some(size) => size,
        None => return skip(source, target, Outcome::SkippedActive),
    };

    match copy_atomic_with_retry(source, target, stable_size, task.retry_count).await {
        Ok(()) => {
            let mtime = mtime_secs(source).await;
            FileOutcome {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                outcome: Outcome::Success,
                size: stable_size,
                mtime,
                error: None,
            }
        }
        Err(e) => fail(source, target, e.to_string()),
    }
}

fn skip(source: &Path, target: &Path, outcome: Outcome) -> FileOutcome {
    FileOutcome {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        outcome,
        size: 0,
        mtime: 0,
        error: None,
    }
}

fn fail(source: &Path, target: &Path, error: String) -> FileOutcome {
    FileOutcome {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        outcome: Outcome::Failed,
        size: 0,
        mtime: 0,
        error: Some(error),
    }
}

/// §4.2 step 4: rule evaluation against the (possibly absent) target.
async fn needs_sync(source: &Path, target: &Path, rules: &shared::config::RuleFlags) -> bool {
    let target_meta = tokio::fs::metadata(target).await.ok();

    match target_meta {
        None => rules.sync_if_absent || rules.overwrite_all,
        Some(target_meta) => {
            if rules.overwrite_all {
                return true;
            }
            if rules.sync_if_size_differs {
                if let Ok(source_meta) = tokio::fs::metadata(source).await {
                    if source_meta.len() != target_meta.len() {
                        return true;
                    }
                }
            }
            if rules.sync_if_source_newer {
                let source_mtime = mtime_secs(source).await;
                let target_mtime = mtime_secs(target).await;
                if source_mtime > target_mtime {
                    return true;
                }
            }
            false
        }
    }
}

/// §4.2 step 5: read size, sleep a fixed dwell, re-read; file is stable only
/// if the size is unchanged and the file still exists.
async fn check_stability(source: &Path, initial_size: u64) -> Option<u64> {
    let dwell = Duration::from_secs(shared::defaults::default_stability_dwell_secs());
    tokio::time::sleep(dwell).await;
    match tokio::fs::metadata(source).await {
        Ok(meta) if meta.len() == initial_size => Some(initial_size),
        _ => None,
    }
}

/// §4.2 step 6: atomic copy via `.tmp_<basename>` sibling and rename, with
/// up to `retry_count + 1` attempts.
async fn copy_atomic_with_retry(
    source: &Path,
    target: &Path,
    expected_size: u64,
    retry_count: u32,
) -> Result<()> {
    let mut last_error = None;

    for attempt in 0..=retry_count {
        match copy_atomic_once(source, target, expected_size).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    source = %source.display(),
                    attempt,
                    error = %e,
                    "atomic copy attempt failed"
                );
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("copy failed with no recorded error")))
}

async fn copy_atomic_once(source: &Path, target: &Path, expected_size: u64) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create target parent: {}", parent.display()))?;
    }

    let tmp_name = format!(
        ".tmp_{}",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("file")
    );
    let tmp_path = target.with_file_name(tmp_name);

    let copy_result = tokio::fs::copy(source, &tmp_path).await;
    if let Err(e) = copy_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e).context("copy to temp file failed");
    }

    let tmp_size = tokio::fs::metadata(&tmp_path).await?.len();
    if tmp_size != expected_size {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        anyhow::bail!(
            "temp file size mismatch: expected {}, got {}",
            expected_size,
            tmp_size
        );
    }

    if let Err(e) = preserve_mtime(source, &tmp_path).await {
        debug!(error = %e, "failed to preserve mtime on temp file");
    }

    if target.exists() {
        let _ = tokio::fs::remove_file(target).await;
    }

    tokio::fs::rename(&tmp_path, target)
        .await
        .context("rename temp file over target failed")?;

    Ok(())
}

async fn preserve_mtime(source: &Path, target: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(source).await?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&target, mtime)).await??;
    Ok(())
}

async fn mtime_secs(path: &Path) -> i64 {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// §4.2 "Reconstruct cache from target": walk the target tree, pairing each
/// non-temp file back to its mirrored source path. Caller upserts the
/// cache in batches; this just enumerates candidate pairs.
pub fn reconstruct_candidates(
    target_root: &Path,
    source_root: &Path,
) -> Vec<(PathBuf, PathBuf, u64, i64)> {
    let mut found = Vec::new();
    let mut seen_dirs = HashSet::new();

    for entry in WalkDir::new(target_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(".tmp_") {
            continue;
        }

        let relative = match entry.path().strip_prefix(target_root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let source = source_root.join(relative);
        if !source.is_file() {
            continue;
        }

        if let Ok(meta) = entry.metadata() {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            found.push((source, entry.path().to_path_buf(), meta.len(), mtime));
        }

        if let Some(parent) = relative.parent() {
            seen_dirs.insert(parent.to_path_buf());
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::{ExtensionFilter, RuleFlags, SizeFilter};

    #[test]
    fn test_stats_percent_done() {
        let mut stats = SyncStats::default();
        stats.record(Outcome::Success);
        stats.record(Outcome::Failed);
        assert_eq!(stats.percent_done(4), 50.0);
    }

    #[tokio::test]
    async fn test_needs_sync_absent_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        tokio::fs::write(&source, b"hello").await.unwrap();
        let target = dir.path().join("missing.mkv");

        let rules = RuleFlags {
            sync_if_absent: true,
            ..Default::default()
        };
        assert!(needs_sync(&source, &target, &rules).await);

        let rules_off = RuleFlags::default();
        assert!(!needs_sync(&source, &target, &rules_off).await);
    }

    #[tokio::test]
    async fn test_check_stability_detects_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.bin");
        tokio::fs::write(&path, vec![0u8; 10]).await.unwrap();

        // Simulate growth by racing a write against the dwell in a
        // deterministic way: pre-grow then assert the stale initial_size
        // mismatches post-dwell.
        let initial_size = 10;
        tokio::fs::write(&path, vec![0u8; 20]).await.unwrap();
        let stable = check_stability(&path, initial_size).await;
        assert!(stable.is_none());
    }

    #[tokio::test]
    async fn test_copy_atomic_once_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        let target = dir.path().join("out/a.bin");
        tokio::fs::write(&source, b"payload").await.unwrap();

        copy_atomic_once(&source, &target, 7).await.unwrap();
        let written = tokio::fs::read(&target).await.unwrap();
        assert_eq!(written, b"payload");
    }

    #[test]
    fn test_extension_and_size_filters_compose() {
        let filter = ExtensionFilter {
            mode: shared::config::ExtensionFilterMode::Include,
            suffixes: vec!["mkv".to_string()],
        };
        assert!(filter.passes(Some("mkv")));
        assert!(!filter.passes(Some("nfo")));

        let size = SizeFilter {
            min_bytes: Some(1024),
            max_bytes: None,
        };
        assert!(!size.passes(512));
        assert!(size.passes(2048));
    }
}
