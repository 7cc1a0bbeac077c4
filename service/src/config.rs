//! On-disk persistence for the two task systems (§4.1 "Persistence",
//! §6.1). Each system's task list lives in its own JSON document; loads are
//! tolerant of missing files and legacy shapes, saves are write-replace.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::config::{ResetStatus, StubTaskConfig, SyncTaskConfig, TasksFile};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SYNC_TASKS_FILE: &str = "sync_tasks.json";
const STUB_TASKS_FILE: &str = "stub_tasks.json";

/// Loads and persists both task-system documents, tracking a checksum of
/// each file's raw content to skip redundant reparses.
pub struct ConfigManager {
    config_dir: PathBuf,
    sync_checksum: Option<String>,
    stub_checksum: Option<String>,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir)
                .with_context(|| format!("failed to create config directory: {}", config_dir.display()))?;
        }

        Ok(Self {
            config_dir,
            sync_checksum: None,
            stub_checksum: None,
        })
    }

    pub async fn load_sync_tasks(&mut self) -> Result<TasksFile<SyncTaskConfig>> {
        let (file, checksum) = self.load_tasks_file(SYNC_TASKS_FILE).await?;
        self.sync_checksum = Some(checksum);
        Ok(file)
    }

    pub async fn load_stub_tasks(&mut self) -> Result<TasksFile<StubTaskConfig>> {
        let (file, checksum) = self.load_tasks_file(STUB_TASKS_FILE).await?;
        self.stub_checksum = Some(checksum);
        Ok(file)
    }

    async fn load_tasks_file<T>(&self, file_name: &str) -> Result<(TasksFile<T>, String)>
    where
        T: Serialize + DeserializeOwned + ResetStatus,
    {
        let path = self.config_dir.join(file_name);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "task file missing, starting empty");
                String::new()
            }
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };

        let checksum = shared::utils::calculate_file_checksum(&raw);
        let (mut tasks_file, migrated) = TasksFile::<T>::parse_lenient(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        tasks_file.reset_all_statuses();

        if migrated {
            info!(path = %path.display(), "migrated task file to current schema on load");
        }

        Ok((tasks_file, checksum))
    }

    pub async fn save_sync_tasks(&mut self, tasks: &TasksFile<SyncTaskConfig>) -> Result<()> {
        let checksum = self.save_tasks_file(SYNC_TASKS_FILE, tasks).await?;
        self.sync_checksum = Some(checksum);
        Ok(())
    }

    pub async fn save_stub_tasks(&mut self, tasks: &TasksFile<StubTaskConfig>) -> Result<()> {
        let checksum = self.save_tasks_file(STUB_TASKS_FILE, tasks).await?;
        self.stub_checksum = Some(checksum);
        Ok(())
    }

    async fn save_tasks_file<T>(&self, file_name: &str, tasks: &TasksFile<T>) -> Result<String>
    where
        T: Serialize + DeserializeOwned,
    {
        let path = self.config_dir.join(file_name);
        let raw = tasks
            .to_pretty_json()
            .with_context(|| format!("failed to serialize {}", path.display()))?;

        write_replace(&path, &raw).await?;
        Ok(shared::utils::calculate_file_checksum(&raw))
    }
}

/// Write a file's new contents via a temp-file-and-rename, matching the
/// atomic-write contract the rest of the service follows for data files.
async fn write_replace(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!(path = %path.display(), error = %e, "rename-over failed, removing temp file");
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e).context("failed to rename temp file over target");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::ScheduleDescriptor;

    fn sample_sync_task() -> SyncTaskConfig {
        SyncTaskConfig {
            id: uuid::Uuid::new_v4(),
            name: "nightly".to_string(),
            source_path: PathBuf::from("/src"),
            target_path: PathBuf::from("/dst"),
            schedule: ScheduleDescriptor::Interval { seconds: 3600 },
            enabled: true,
            status: shared::config::TaskStatus::Idle,
            last_run: None,
            rules: Default::default(),
            workers: 1,
            slow_storage: false,
            size_filter: Default::default(),
            extension_filter: Default::default(),
            deletion_policy: Default::default(),
            retry_count: 2,
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();
        let tasks = mgr.load_sync_tasks().await.unwrap();
        assert!(tasks.tasks.is_empty());
        assert_eq!(tasks.schema_version, 1);
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();

        let mut file = TasksFile::<SyncTaskConfig>::default();
        file.tasks.push(sample_sync_task());
        mgr.save_sync_tasks(&file).await.unwrap();

        let reloaded = mgr.load_sync_tasks().await.unwrap();
        assert_eq!(reloaded.tasks.len(), 1);
        assert_eq!(reloaded.tasks[0].name, "nightly");
    }

    #[tokio::test]
    async fn test_reload_resets_running_status_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ConfigManager::new(dir.path().to_path_buf()).unwrap();

        let mut file = TasksFile::<SyncTaskConfig>::default();
        let mut task = sample_sync_task();
        task.status = shared::config::TaskStatus::Running;
        file.tasks.push(task);
        mgr.save_sync_tasks(&file).await.unwrap();

        let reloaded = mgr.load_sync_tasks().await.unwrap();
        assert_eq!(reloaded.tasks[0].status, shared::config::TaskStatus::Idle);
    }
}
