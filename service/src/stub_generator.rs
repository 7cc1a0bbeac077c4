//! Stub generator: turns a remote listing into `.stub` redirector files
//! under a task's target root, with blu-ray grouping, smart-protected
//! orphan deletion, and optional server-side deletion echo (§4.3).

use crate::smart_protection::ProtectionGate;
use anyhow::{Context, Result};
use shared::config::{ExtensionFilter, StubContentMode, StubFlags, StubTaskConfig};
use shared::remote::{RemoteFile, RemoteHost};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Built-in qualifying video extensions (§4.3 "Remote listing").
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "flv", "wmv", "mpeg", "mpg", "m4v", "ts", "rmvb", "webm", "m2ts",
];

#[derive(Debug, Clone, Default)]
pub struct StubStats {
    pub total: u64,
    pub created: u64,
    pub skipped: u64,
    pub failed: u64,
    pub deleted: u64,
    pub extra_synced: u64,
}

/// Run one full stub-generation pass for `task` against `host`.
pub async fn run<H: RemoteHost>(
    task: &StubTaskConfig,
    host: &H,
    page_size: u32,
) -> Result<StubStats> {
    host.test_connection()
        .await
        .context("remote-host connection test failed")?;

    let mut all_files = list_all_recursive(host, &task.source_root, page_size).await?;
    all_files.retain(|f| is_qualifying_video(&f.name, &task.extension_filter));

    let mut stats = StubStats {
        total: all_files.len() as u64,
        ..Default::default()
    };

    if all_files.is_empty() {
        return Ok(stats);
    }

    let grouped = group_bdmv(all_files);

    let existing = collect_existing_stubs(&task.target_root);
    let mut generated = HashSet::new();

    for file in &grouped {
        match materialize_one(task, host, file).await {
            Ok(Some(path)) => {
                generated.insert(path);
                stats.created += 1;
            }
            Ok(None) => {
                // still accounted for by its existing path, so it isn't orphaned
                if let Some(path) = target_path_for(task, file) {
                    generated.insert(path);
                }
                stats.skipped += 1;
            }
            Err(e) => {
                warn!(file = %file.path, error = %e, "failed to materialize stub");
                stats.failed += 1;
            }
        }
    }

    if task.flags.sync_server_deletes {
        let deleted = sync_deletions(task, &existing, &generated).await?;
        stats.deleted = deleted;
    }

    if task.flags.sync_local_deletes_to_server {
        sync_local_deletions_to_server(task, host, &grouped).await?;
    }

    Ok(stats)
}

/// Recursively page through the remote listing (§4.3 "Remote listing").
async fn list_all_recursive<H: RemoteHost>(
    host: &H,
    root: &str,
    page_size: u32,
) -> Result<Vec<RemoteFile>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_string()];

    while let Some(path) = stack.pop() {
        let mut page = 1;
        loop {
            let listing = host.list_dir(&path, page, page_size).await?;
            for entry in &listing.entries {
                if entry.is_dir {
                    stack.push(entry.path.clone());
                } else {
                    found.push(entry.clone());
                }
            }
            if (page * page_size) as u64 >= listing.total {
                break;
            }
            page += 1;
        }
    }

    Ok(found)
}

fn is_qualifying_video(name: &str, task_filter: &ExtensionFilter) -> bool {
    let ext = match shared::utils::lowercase_extension(name) {
        Some(e) => e,
        None => return false,
    };
    VIDEO_EXTENSIONS.contains(&ext.as_str()) && task_filter.passes(Some(&ext))
}

/// Blu-ray grouping (§4.3 "Blu-ray grouping"): collapse `/BDMV/STREAM/*.m2ts`
/// siblings down to the single largest file per movie root, renamed to
/// `<root-leaf>.m2ts`.
fn group_bdmv(files: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let mut bdmv_groups: HashMap<String, Vec<RemoteFile>> = HashMap::new();
    let mut rest = Vec::new();

    for file in files {
        if file.path.contains("/BDMV/STREAM/") && file.path.to_lowercase().ends_with(".m2ts") {
            if let Some(movie_root) = file.path.split("/BDMV/").next() {
                bdmv_groups
                    .entry(movie_root.to_string())
                    .or_default()
                    .push(file);
            } else {
                rest.push(file);
            }
        } else {
            rest.push(file);
        }
    }

    for (movie_root, mut group) in bdmv_groups {
        group.sort_by_key(|f| f.size);
        if let Some(mut largest) = group.pop() {
            let movie_name = Path::new(&movie_root)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&movie_root)
                .to_string();
            largest.name = format!("{}.m2ts", movie_name);
            rest.push(largest);
        }
    }

    rest
}

/// Derive the `.stub` target path for a remote file (§4.3 "Target path derivation").
fn target_path_for(task: &StubTaskConfig, file: &RemoteFile) -> Option<PathBuf> {
    let relative = if task.flags.flatten {
        PathBuf::from(&file.name)
    } else {
        let stripped = file
            .path
            .strip_prefix(&task.source_root)
            .unwrap_or(&file.path)
            .trim_start_matches('/');
        PathBuf::from(stripped)
    };
    Some(task.target_root.join(relative.with_extension("stub")))
}

async fn materialize_one<H: RemoteHost>(
    task: &StubTaskConfig,
    host: &H,
    file: &RemoteFile,
) -> Result<Option<PathBuf>> {
    let stub_path = target_path_for(task, file).context("could not derive stub path")?;

    if stub_path.exists() && !task.flags.overwrite {
        return Ok(None);
    }

    if let Some(parent) = stub_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create stub parent: {}", parent.display()))?;
    }

    let content = stub_content(task, file);
    tokio::fs::write(&stub_path, content.as_bytes())
        .await
        .with_context(|| format!("failed to write stub: {}", stub_path.display()))?;

    if task.flags.copy_subtitles || task.flags.copy_images || task.flags.copy_nfo {
        if let Err(e) = copy_sibling_files(task, host, file, &stub_path).await {
            debug!(error = %e, "sibling file copy failed for {}", file.path);
        }
    }

    Ok(Some(stub_path))
}

fn stub_content(task: &StubTaskConfig, file: &RemoteFile) -> String {
    match task.content_mode {
        StubContentMode::RemoteDownloadUrl => download_url(task, file),
        StubContentMode::RemoteRawUrl => raw_url(task, file),
        StubContentMode::RemotePath => file.path.clone(),
    }
}

/// Derive `<base>/d/<signature>/<name>`, substituting the configured public
/// alias for `<base>` when set (§6.3 "Download URL derivation").
fn download_url(task: &StubTaskConfig, file: &RemoteFile) -> String {
    let base = task.remote.url.trim_end_matches('/');
    let sign = file.sign.as_deref().unwrap_or("");
    let url = format!("{}/d/{}/{}", base, sign, file.name);
    match &task.remote.public_url {
        Some(public) => url.replacen(base, public.trim_end_matches('/'), 1),
        None => url,
    }
}

fn raw_url(task: &StubTaskConfig, file: &RemoteFile) -> String {
    let base = task.remote.public_url.as_deref().unwrap_or(&task.remote.url);
    format!("{}/d{}", base.trim_end_matches('/'), file.path)
}

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "vtt", "sub"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const NFO_EXTENSIONS: &[&str] = &["nfo"];

/// Locate sibling files sharing the video's stem and copy them alongside
/// the stub, per the task's `copySubtitles`/`copyImages`/`copyNfo` flags.
async fn copy_sibling_files<H: RemoteHost>(
    task: &StubTaskConfig,
    host: &H,
    video_file: &RemoteFile,
    stub_path: &Path,
) -> Result<()> {
    let parent_dir = Path::new(&video_file.path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let video_stem = Path::new(&video_file.name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&video_file.name)
        .to_string();

    let listing = host.list_dir(&parent_dir, 1, 200).await?;
    let target_dir = stub_path.parent().unwrap_or(Path::new("."));

    for entry in listing.entries {
        if entry.is_dir {
            continue;
        }
        let stem = Path::new(&entry.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&entry.name);
        if stem != video_stem {
            continue;
        }

        let ext = shared::utils::lowercase_extension(&entry.name);
        let should_copy = match ext.as_deref() {
            Some(e) if task.flags.copy_subtitles && SUBTITLE_EXTENSIONS.contains(&e) => true,
            Some(e) if task.flags.copy_images && IMAGE_EXTENSIONS.contains(&e) => true,
            Some(e) if task.flags.copy_nfo && NFO_EXTENSIONS.contains(&e) => true,
            _ => false,
        };
        if !should_copy {
            continue;
        }

        let sibling_target = target_dir.join(&entry.name);
        if sibling_target.exists() && !task.flags.overwrite {
            continue;
        }
        // Sibling assets are recorded as a one-line pointer file too; the
        // generator does not stream media content through this process.
        tokio::fs::write(&sibling_target, stub_content(task, &entry).as_bytes()).await?;
    }

    Ok(())
}

fn collect_existing_stubs(target_root: &Path) -> HashSet<PathBuf> {
    if !target_root.exists() {
        return HashSet::new();
    }
    walkdir::WalkDir::new(target_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("stub"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Orphan diff plus smart-protection, then unlink the cleared subset
/// (§4.3 "Orphan diff").
async fn sync_deletions(
    task: &StubTaskConfig,
    existing: &HashSet<PathBuf>,
    generated: &HashSet<PathBuf>,
) -> Result<u64> {
    let orphans: HashSet<String> = existing
        .difference(generated)
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let present: HashSet<String> = generated
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();

    if orphans.is_empty() {
        return Ok(0);
    }

    let mut gate = ProtectionGate::load(&task.target_root, task.protection.threshold, task.protection.grace_scans)?;
    let ready = gate.process(&orphans, &present)?;

    let mut deleted = 0;
    for path in &ready {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path, error = %e, "failed to delete orphaned stub");
        } else {
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!(deleted, "smart-protection cleared stubs for deletion");
    }

    Ok(deleted)
}

/// Echo locally-deleted stubs back to the remote host, subject to the
/// smart-protection threshold as a safety cap (§4.3 "Server-side deletion echo").
async fn sync_local_deletions_to_server<H: RemoteHost>(
    task: &StubTaskConfig,
    host: &H,
    files: &[RemoteFile],
) -> Result<()> {
    let mut pending = Vec::new();

    for file in files {
        let Some(stub_path) = target_path_for(task, file) else {
            continue;
        };
        if stub_path.exists() {
            continue;
        }

        let ext = shared::utils::lowercase_extension(&file.name);
        if !task.extension_filter.passes(ext.as_deref()) {
            continue;
        }

        // Only treat this as a user deletion if the enclosing directory is
        // known locally; an absent parent more likely means the task is new.
        if stub_path.parent().map(|p| p.exists()).unwrap_or(false) {
            pending.push(file.path.clone());
        }
    }

    if pending.is_empty() {
        return Ok(());
    }

    if pending.len() > task.protection.threshold {
        warn!(
            pending = pending.len(),
            threshold = task.protection.threshold,
            "server-side deletion echo aborted by smart-protection threshold"
        );
        return Ok(());
    }

    host.remove(&pending).await?;
    info!(count = pending.len(), "echoed local stub deletions to remote host");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_file(path: &str, size: u64) -> RemoteFile {
        RemoteFile {
            name: Path::new(path).file_name().unwrap().to_string_lossy().to_string(),
            path: path.to_string(),
            is_dir: false,
            size,
            modified: None,
            sign: Some("sig".to_string()),
        }
    }

    #[test]
    fn test_group_bdmv_keeps_largest() {
        let files = vec![
            remote_file("/Movies/Avatar/BDMV/STREAM/00001.m2ts", 100),
            remote_file("/Movies/Avatar/BDMV/STREAM/00002.m2ts", 5000),
            remote_file("/Movies/Other/feature.mkv", 2000),
        ];

        let grouped = group_bdmv(files);
        assert_eq!(grouped.len(), 2);
        let bdmv_entry = grouped.iter().find(|f| f.path.contains("BDMV")).unwrap();
        assert_eq!(bdmv_entry.name, "Avatar.m2ts");
        assert_eq!(bdmv_entry.size, 5000);
    }

    #[test]
    fn test_is_qualifying_video() {
        let filter = ExtensionFilter::default();
        assert!(is_qualifying_video("movie.mkv", &filter));
        assert!(!is_qualifying_video("subtitle.srt", &filter));
    }

    #[test]
    fn test_target_path_flatten() {
        let task = StubTaskConfig {
            id: uuid::Uuid::new_v4(),
            name: "t".to_string(),
            source_root: "/media".to_string(),
            target_root: PathBuf::from("/out"),
            schedule: shared::config::ScheduleDescriptor::Interval { seconds: 60 },
            enabled: true,
            status: shared::config::TaskStatus::Idle,
            last_run: None,
            remote: Default::default(),
            content_mode: StubContentMode::RemoteDownloadUrl,
            flags: StubFlags {
                flatten: true,
                ..Default::default()
            },
            workers: 1,
            extension_filter: ExtensionFilter::default(),
            protection: Default::default(),
        };
        let file = remote_file("/media/Shows/S01/ep1.mkv", 100);
        assert_eq!(
            target_path_for(&task, &file),
            Some(PathBuf::from("/out/ep1.stub"))
        );
    }

    #[test]
    fn test_target_path_mirrors_structure() {
        let task = StubTaskConfig {
            id: uuid::Uuid::new_v4(),
            name: "t".to_string(),
            source_root: "/media".to_string(),
            target_root: PathBuf::from("/out"),
            schedule: shared::config::ScheduleDescriptor::Interval { seconds: 60 },
            enabled: true,
            status: shared::config::TaskStatus::Idle,
            last_run: None,
            remote: Default::default(),
            content_mode: StubContentMode::RemoteDownloadUrl,
            flags: StubFlags::default(),
            workers: 1,
            extension_filter: ExtensionFilter::default(),
            protection: Default::default(),
        };
        let file = remote_file("/media/Shows/S01/ep1.mkv", 100);
        assert_eq!(
            target_path_for(&task, &file),
            Some(PathBuf::from("/out/Shows/S01/ep1.stub"))
        );
    }
}
