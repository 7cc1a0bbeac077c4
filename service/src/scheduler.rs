//! Scheduler core (§4.1): owns both task registries, turns schedule
//! descriptors into periodic firings, serializes execution through a
//! single dispatch consumer, and exposes CRUD/lifecycle operations to the
//! control plane.

use crate::config::ConfigManager;
use crate::database::{Database, RunOutcome};
use crate::{deletion, stub_generator, sync_engine};
use anyhow::{Context, Result};
use shared::config::{ScheduleDescriptor, StubTaskConfig, SyncTaskConfig, TaskStatus, TasksFile};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Which task registry an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSystem {
    Sync,
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Stopped,
    Running,
}

/// A handle for an individual task's ticker, cancelled when the task is
/// removed, disabled, or its schedule changes.
struct TickerHandle {
    join: JoinHandle<()>,
}

pub struct Scheduler {
    sync_tasks: Arc<RwLock<TasksFile<SyncTaskConfig>>>,
    stub_tasks: Arc<RwLock<TasksFile<StubTaskConfig>>>,
    config: Arc<Mutex<ConfigManager>>,
    database: Arc<Mutex<Database>>,

    dispatch_tx: mpsc::UnboundedSender<(TaskSystem, Uuid, bool)>,
    dispatch_rx: Arc<Mutex<mpsc::UnboundedReceiver<(TaskSystem, Uuid, bool)>>>,
    queue_depth: Arc<std::sync::atomic::AtomicU64>,

    tickers: Arc<Mutex<HashMap<Uuid, TickerHandle>>>,
    state: Arc<RwLock<SchedulerState>>,
    shutdown: Arc<tokio::sync::Notify>,
    consumer: Mutex<Option<JoinHandle<()>>>,

    remote_timeout_secs: u64,
}

impl Scheduler {
    pub fn new(
        sync_tasks: TasksFile<SyncTaskConfig>,
        stub_tasks: TasksFile<StubTaskConfig>,
        config: ConfigManager,
        database: Database,
        remote_timeout_secs: u64,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        Self {
            sync_tasks: Arc::new(RwLock::new(sync_tasks)),
            stub_tasks: Arc::new(RwLock::new(stub_tasks)),
            config: Arc::new(Mutex::new(config)),
            database: Arc::new(Mutex::new(database)),
            dispatch_tx,
            dispatch_rx: Arc::new(Mutex::new(dispatch_rx)),
            queue_depth: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            tickers: Arc::new(Mutex::new(HashMap::new())),
            state: Arc::new(RwLock::new(SchedulerState::Stopped)),
            shutdown: Arc::new(tokio::sync::Notify::new()),
            consumer: Mutex::new(None),
            remote_timeout_secs,
        }
    }

    // ---- lifecycle ----

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if *self.state.read().await == SchedulerState::Running {
            return Ok(());
        }

        info!("starting scheduler");
        *self.state.write().await = SchedulerState::Running;

        let sync_ids: Vec<Uuid> = self
            .sync_tasks
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.id)
            .collect();
        for id in sync_ids {
            self.register_trigger(TaskSystem::Sync, id).await?;
        }

        let stub_ids: Vec<Uuid> = self
            .stub_tasks
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.id)
            .collect();
        for id in stub_ids {
            self.register_trigger(TaskSystem::Stub, id).await?;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.consume_loop().await });
        *self.consumer.lock().await = Some(handle);

        info!("scheduler started");
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        if *self.state.read().await == SchedulerState::Stopped {
            return Ok(());
        }

        info!("stopping scheduler");
        *self.state.write().await = SchedulerState::Stopped;
        self.shutdown.notify_waiters();

        {
            let mut tickers = self.tickers.lock().await;
            for (_, handle) in tickers.drain() {
                handle.join.abort();
            }
        }

        if let Some(handle) = self.consumer.lock().await.take() {
            let shutdown_timeout =
                Duration::from_secs(shared::defaults::default_graceful_shutdown_timeout_secs());
            match tokio::time::timeout(shutdown_timeout, handle).await {
                Ok(_) => debug!("dispatch consumer joined cleanly"),
                Err(_) => warn!("dispatch consumer did not join within timeout"),
            }
        }

        self.database.lock().await.close();
        info!("scheduler stopped");
        Ok(())
    }

    // ---- registration ----

    async fn register_trigger(&self, system: TaskSystem, task_id: Uuid) -> Result<()> {
        let schedule = match system {
            TaskSystem::Sync => self
                .sync_tasks
                .read()
                .await
                .tasks
                .iter()
                .find(|t| t.id == task_id)
                .map(|t| t.schedule.clone()),
            TaskSystem::Stub => self
                .stub_tasks
                .read()
                .await
                .tasks
                .iter()
                .find(|t| t.id == task_id)
                .map(|t| t.schedule.clone()),
        };
        let Some(schedule) = schedule else {
            return Ok(());
        };

        self.cancel_trigger(task_id).await;

        let dispatch_tx = self.dispatch_tx.clone();
        let queue_depth = self.queue_depth.clone();
        let sync_tasks = self.sync_tasks.clone();
        let stub_tasks = self.stub_tasks.clone();
        let shutdown = self.shutdown.clone();

        let join = tokio::spawn(async move {
            loop {
                let sleep_for = match next_fire_delay(&schedule) {
                    Some(d) => d,
                    None => return,
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown.notified() => return,
                }

                let idle = match system {
                    TaskSystem::Sync => sync_tasks
                        .read()
                        .await
                        .tasks
                        .iter()
                        .find(|t| t.id == task_id)
                        .map(|t| t.status == TaskStatus::Idle)
                        .unwrap_or(false),
                    TaskSystem::Stub => stub_tasks
                        .read()
                        .await
                        .tasks
                        .iter()
                        .find(|t| t.id == task_id)
                        .map(|t| t.status == TaskStatus::Idle)
                        .unwrap_or(false),
                };

                if !idle {
                    warn!(%task_id, "scheduled fire skipped: task not IDLE");
                    continue;
                }

                if mark_queued(&sync_tasks, &stub_tasks, system, task_id).await {
                    queue_depth.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let _ = dispatch_tx.send((system, task_id, false));
                }
            }
        });

        self.tickers.lock().await.insert(task_id, TickerHandle { join });
        Ok(())
    }

    async fn cancel_trigger(&self, task_id: Uuid) {
        if let Some(handle) = self.tickers.lock().await.remove(&task_id) {
            handle.join.abort();
        }
    }

    // ---- CRUD ----

    pub async fn add_sync_task(&self, task: SyncTaskConfig) -> Result<()> {
        task.validate().context("invalid sync task")?;
        let mut file = self.sync_tasks.write().await;
        if file.tasks.iter().any(|t| t.id == task.id) {
            anyhow::bail!("duplicate task id: {}", task.id);
        }
        file.tasks.push(task);
        self.persist_sync(&file).await
    }

    pub async fn add_stub_task(&self, task: StubTaskConfig) -> Result<()> {
        task.validate().context("invalid stub task")?;
        let mut file = self.stub_tasks.write().await;
        if file.tasks.iter().any(|t| t.id == task.id) {
            anyhow::bail!("duplicate task id: {}", task.id);
        }
        file.tasks.push(task);
        self.persist_stub(&file).await
    }

    /// Replace a sync task's configurable fields in place, preserving its
    /// id, enabled flag, status, and last-run timestamp; re-registers its
    /// ticker if its schedule changed and the scheduler is running.
    pub async fn update_sync_task(&self, task_id: Uuid, mut updated: SyncTaskConfig) -> Result<()> {
        updated.validate().context("invalid sync task")?;
        {
            let mut file = self.sync_tasks.write().await;
            let existing = file
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| anyhow::anyhow!("sync task {} not found", task_id))?;
            updated.id = existing.id;
            updated.enabled = existing.enabled;
            updated.status = existing.status;
            updated.last_run = existing.last_run;
            *existing = updated;
            self.persist_sync(&file).await?;
        }

        if *self.state.read().await == SchedulerState::Running {
            self.register_trigger(TaskSystem::Sync, task_id).await?;
        }
        Ok(())
    }

    /// Replace a stub task's configurable fields in place, analogous to
    /// [`Scheduler::update_sync_task`].
    pub async fn update_stub_task(&self, task_id: Uuid, mut updated: StubTaskConfig) -> Result<()> {
        updated.validate().context("invalid stub task")?;
        {
            let mut file = self.stub_tasks.write().await;
            let existing = file
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| anyhow::anyhow!("stub task {} not found", task_id))?;
            updated.id = existing.id;
            updated.enabled = existing.enabled;
            updated.status = existing.status;
            updated.last_run = existing.last_run;
            *existing = updated;
            self.persist_stub(&file).await?;
        }

        if *self.state.read().await == SchedulerState::Running {
            self.register_trigger(TaskSystem::Stub, task_id).await?;
        }
        Ok(())
    }

    pub async fn remove_task(&self, system: TaskSystem, task_id: Uuid) -> Result<()> {
        self.cancel_trigger(task_id).await;
        match system {
            TaskSystem::Sync => {
                let mut file = self.sync_tasks.write().await;
                file.tasks.retain(|t| t.id != task_id);
                self.persist_sync(&file).await
            }
            TaskSystem::Stub => {
                let mut file = self.stub_tasks.write().await;
                file.tasks.retain(|t| t.id != task_id);
                self.persist_stub(&file).await
            }
        }
    }

    pub async fn set_enabled(&self, system: TaskSystem, task_id: Uuid, enabled: bool) -> Result<()> {
        let running = *self.state.read().await == SchedulerState::Running;
        match system {
            TaskSystem::Sync => {
                let mut file = self.sync_tasks.write().await;
                if let Some(t) = file.tasks.iter_mut().find(|t| t.id == task_id) {
                    t.enabled = enabled;
                }
                self.persist_sync(&file).await?;
            }
            TaskSystem::Stub => {
                let mut file = self.stub_tasks.write().await;
                if let Some(t) = file.tasks.iter_mut().find(|t| t.id == task_id) {
                    t.enabled = enabled;
                }
                self.persist_stub(&file).await?;
            }
        }

        if running {
            if enabled {
                self.register_trigger(system, task_id).await?;
            } else {
                self.cancel_trigger(task_id).await;
            }
        }
        Ok(())
    }

    /// Manual enqueue (§4.1 `triggerNow`): honors the IDLE guard and
    /// collapses a trigger arriving within the dedup window into a no-op
    /// (§4.1 burst suppression).
    pub async fn trigger_now(&self, system: TaskSystem, task_id: Uuid, full_overwrite: bool) -> Result<()> {
        let now = shared::utils::current_timestamp();
        let since = now - shared::defaults::default_history_dedup_window_secs();
        if self
            .database
            .lock()
            .await
            .has_recent_history_run(task_id, since)?
        {
            debug!(%task_id, "manual trigger suppressed: run already started within dedup window");
            return Ok(());
        }

        if !mark_queued(&self.sync_tasks, &self.stub_tasks, system, task_id).await {
            anyhow::bail!("task {} is not IDLE", task_id);
        }
        self.queue_depth.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.dispatch_tx
            .send((system, task_id, full_overwrite))
            .map_err(|_| anyhow::anyhow!("dispatch queue closed"))?;
        Ok(())
    }

    /// Rebuild a sync task's file-cache from its target tree on demand
    /// (§4.1 "Reconstruct cache"), batched in groups of
    /// [`shared::defaults::default_reconstruct_batch_size`] and appending
    /// one INFO history row.
    pub async fn reconstruct_cache(&self, task_id: Uuid) -> Result<usize> {
        let task = {
            let file = self.sync_tasks.read().await;
            file.tasks.iter().find(|t| t.id == task_id).cloned()
        };
        let Some(task) = task else {
            anyhow::bail!("sync task {} not found", task_id);
        };

        let candidates = sync_engine::reconstruct_candidates(&task.target_path, &task.source_path);
        let now = shared::utils::current_timestamp();

        let mut db = self.database.lock().await;
        db.clear_cache_for_task(task.id)?;

        let batch_size = shared::defaults::default_reconstruct_batch_size();
        for chunk in candidates.chunks(batch_size) {
            let entries: Vec<crate::database::CacheEntry> = chunk
                .iter()
                .map(|(source, target, size, mtime)| crate::database::CacheEntry {
                    source_path: source.to_string_lossy().to_string(),
                    target_path: target.to_string_lossy().to_string(),
                    size: *size,
                    mtime: *mtime,
                    hash: None,
                    hash_at: None,
                    sync_status: crate::database::SyncStatus::Synced,
                    synced_at: Some(now),
                    deleted_at: None,
                    last_seen_at: now,
                    last_error: None,
                    metadata: Some("reconstructed".to_string()),
                })
                .collect();
            db.batch_upsert_cache_entries(task.id, &entries)?;
        }

        db.record_event_history(
            task.id,
            &task.name,
            now,
            "info",
            Some(&format!("reconstructed {} file_cache entries from target tree", candidates.len())),
        )?;

        Ok(candidates.len())
    }

    pub async fn queue_size(&self) -> u64 {
        self.queue_depth.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Shared handle to the metadata store, for callers (the control plane)
    /// that need to query history/queue tables directly.
    pub fn database_handle(&self) -> Arc<Mutex<Database>> {
        self.database.clone()
    }

    pub async fn get_sync_tasks(&self) -> Vec<SyncTaskConfig> {
        self.sync_tasks.read().await.tasks.clone()
    }

    pub async fn get_stub_tasks(&self) -> Vec<StubTaskConfig> {
        self.stub_tasks.read().await.tasks.clone()
    }

    pub async fn get_sync_task(&self, task_id: Uuid) -> Option<SyncTaskConfig> {
        self.sync_tasks.read().await.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    pub async fn get_stub_task(&self, task_id: Uuid) -> Option<StubTaskConfig> {
        self.stub_tasks.read().await.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    async fn persist_sync(&self, file: &TasksFile<SyncTaskConfig>) -> Result<()> {
        self.config.lock().await.save_sync_tasks(file).await
    }

    async fn persist_stub(&self, file: &TasksFile<StubTaskConfig>) -> Result<()> {
        self.config.lock().await.save_stub_tasks(file).await
    }

    // ---- dispatch consumer ----

    async fn consume_loop(self: Arc<Self>) {
        loop {
            if *self.state.read().await != SchedulerState::Running {
                return;
            }

            let next = {
                let mut rx = self.dispatch_rx.lock().await;
                let poll_interval = Duration::from_millis(shared::defaults::default_dispatch_poll_millis());
                tokio::time::timeout(poll_interval, rx.recv()).await
            };

            let (system, task_id, full_overwrite) = match next {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(_) => continue,
            };

            self.queue_depth.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);

            let result = match system {
                TaskSystem::Sync => self.dispatch_sync(task_id, full_overwrite).await,
                TaskSystem::Stub => self.dispatch_stub(task_id, full_overwrite).await,
            };

            if let Err(e) = result {
                error!(%task_id, error = %e, "task dispatch failed");
            }
        }
    }

    /// Execution wrapper for a sync task (§4.1 "Execution wrapper (sync variant)").
    async fn dispatch_sync(&self, task_id: Uuid, full_overwrite: bool) -> Result<()> {
        let task = {
            let file = self.sync_tasks.read().await;
            file.tasks.iter().find(|t| t.id == task_id).cloned()
        };
        let Some(mut task) = task else { return Ok(()) };
        if full_overwrite {
            task.rules.overwrite_all = true;
        }

        let now = shared::utils::current_timestamp();
        {
            let mut db = self.database.lock().await;
            let _ = deletion::discharge(&mut db, task.id, &task.name, &task.source_path, now, 1000);
        }

        if !task.source_path.is_dir() {
            self.finish_sync(task.id, TaskStatus::Error).await;
            anyhow::bail!("source path is not a directory: {}", task.source_path.display());
        }

        self.set_sync_status(task.id, TaskStatus::Running).await;

        let history_id = self
            .database
            .lock()
            .await
            .start_history_run(task.id, &task.name, now)?;

        let database = self.database.clone();
        let task_for_callback = task.clone();
        let on_outcome = move |outcome: sync_engine::FileOutcome| {
            let database = database.clone();
            let task = task_for_callback.clone();
            tokio::spawn(async move {
                let mut db = database.lock().await;
                let now = shared::utils::current_timestamp();

                let status = match outcome.outcome {
                    sync_engine::Outcome::Success => crate::database::SyncStatus::Synced,
                    sync_engine::Outcome::SkippedUnchanged => crate::database::SyncStatus::Synced,
                    sync_engine::Outcome::Failed => crate::database::SyncStatus::Failed,
                    _ => return,
                };

                let entry = crate::database::CacheEntry {
                    source_path: outcome.source.to_string_lossy().to_string(),
                    target_path: outcome.target.to_string_lossy().to_string(),
                    size: outcome.size,
                    mtime: outcome.mtime,
                    hash: None,
                    hash_at: None,
                    sync_status: status,
                    synced_at: if status == crate::database::SyncStatus::Synced {
                        Some(now)
                    } else {
                        None
                    },
                    deleted_at: None,
                    last_seen_at: now,
                    last_error: outcome.error.clone(),
                    metadata: None,
                };
                let _ = db.upsert_cache_entry(task.id, &entry);

                if status == crate::database::SyncStatus::Synced {
                    let _ = deletion::enqueue_if_enabled(
                        &mut db,
                        task.id,
                        &outcome.source,
                        &task.deletion_policy,
                        now,
                    );
                }
            });
        };

        let run_result = sync_engine::run(&task, on_outcome).await;

        let (result_str, error_message, final_status) = match &run_result {
            Ok(_) => ("success".to_string(), None, TaskStatus::Idle),
            Err(e) => ("failed".to_string(), Some(e.to_string()), TaskStatus::Error),
        };

        let stats = run_result.unwrap_or_default();
        let now = shared::utils::current_timestamp();

        {
            let mut db = self.database.lock().await;
            let _ = db.finish_history_run(
                history_id,
                now,
                &RunOutcome {
                    files_processed: stats.total,
                    files_copied: stats.success,
                    files_deleted: 0,
                    bytes_transferred: 0,
                    result: result_str,
                    error_message,
                },
            );

            let discharge = deletion::discharge(&mut db, task.id, &task.name, &task.source_path, now, 1000)?;
            if !discharge.deleted.is_empty() {
                let pruned = deletion::prune_ancestors(
                    &mut db,
                    task.id,
                    &discharge.deleted,
                    &task.source_path,
                    &task.deletion_policy,
                )?;
                debug!(count = pruned.len(), "pruned empty ancestor directories");
            }
        }

        self.finish_sync(task.id, final_status).await;
        Ok(())
    }

    /// Execution wrapper for a stub task — analogous to the sync variant,
    /// invoking the stub generator instead and with no delete-queue
    /// involvement (§4.1 "Execution wrapper (stub variant)").
    async fn dispatch_stub(&self, task_id: Uuid, full_overwrite: bool) -> Result<()> {
        let task = {
            let file = self.stub_tasks.read().await;
            file.tasks.iter().find(|t| t.id == task_id).cloned()
        };
        let Some(mut task) = task else { return Ok(()) };
        if full_overwrite {
            task.flags.overwrite = true;
        }

        self.set_stub_status(task.id, TaskStatus::Running).await;

        let now = shared::utils::current_timestamp();
        let history_id = self
            .database
            .lock()
            .await
            .start_history_run(task.id, &task.name, now)?;

        let client = crate::remote_client::OpenListClient::new(
            &task.remote.url,
            task.remote.username.clone(),
            task.remote.password.clone(),
            task.remote.token.clone(),
            task.remote.public_url.clone(),
            self.remote_timeout_secs,
        )?;

        let run_result = stub_generator::run(&task, &client, shared::defaults::default_remote_page_size()).await;

        let (result_str, error_message, final_status) = match &run_result {
            Ok(_) => ("success".to_string(), None, TaskStatus::Idle),
            Err(e) => ("failed".to_string(), Some(e.to_string()), TaskStatus::Error),
        };

        let stats = run_result.unwrap_or_default();
        let now = shared::utils::current_timestamp();

        {
            let mut db = self.database.lock().await;
            let _ = db.finish_history_run(
                history_id,
                now,
                &RunOutcome {
                    files_processed: stats.total,
                    files_copied: stats.created,
                    files_deleted: stats.deleted,
                    bytes_transferred: 0,
                    result: result_str,
                    error_message,
                },
            );
        }

        self.finish_stub(task.id, final_status).await;
        Ok(())
    }

    async fn set_sync_status(&self, task_id: Uuid, status: TaskStatus) {
        let mut file = self.sync_tasks.write().await;
        if let Some(t) = file.tasks.iter_mut().find(|t| t.id == task_id) {
            t.status = status;
        }
    }

    async fn set_stub_status(&self, task_id: Uuid, status: TaskStatus) {
        let mut file = self.stub_tasks.write().await;
        if let Some(t) = file.tasks.iter_mut().find(|t| t.id == task_id) {
            t.status = status;
        }
    }

    async fn finish_sync(&self, task_id: Uuid, status: TaskStatus) {
        let now = shared::utils::current_timestamp();
        let mut file = self.sync_tasks.write().await;
        if let Some(t) = file.tasks.iter_mut().find(|t| t.id == task_id) {
            t.status = status;
            t.last_run = Some(now);
        }
        let _ = self.persist_sync(&file).await;
    }

    async fn finish_stub(&self, task_id: Uuid, status: TaskStatus) {
        let now = shared::utils::current_timestamp();
        let mut file = self.stub_tasks.write().await;
        if let Some(t) = file.tasks.iter_mut().find(|t| t.id == task_id) {
            t.status = status;
            t.last_run = Some(now);
        }
        let _ = self.persist_stub(&file).await;
    }
}

/// Flip a task's status from IDLE to QUEUED, the only place §4.1 permits
/// that assertion. Returns whether the transition succeeded.
async fn mark_queued(
    sync_tasks: &Arc<RwLock<TasksFile<SyncTaskConfig>>>,
    stub_tasks: &Arc<RwLock<TasksFile<StubTaskConfig>>>,
    system: TaskSystem,
    task_id: Uuid,
) -> bool {
    match system {
        TaskSystem::Sync => {
            let mut file = sync_tasks.write().await;
            match file.tasks.iter_mut().find(|t| t.id == task_id) {
                Some(t) if t.status == TaskStatus::Idle => {
                    t.status = TaskStatus::Queued;
                    true
                }
                _ => false,
            }
        }
        TaskSystem::Stub => {
            let mut file = stub_tasks.write().await;
            match file.tasks.iter_mut().find(|t| t.id == task_id) {
                Some(t) if t.status == TaskStatus::Idle => {
                    t.status = TaskStatus::Queued;
                    true
                }
                _ => false,
            }
        }
    }
}

/// Duration until a schedule descriptor's next fire, from now.
fn next_fire_delay(schedule: &ScheduleDescriptor) -> Option<Duration> {
    match schedule {
        ScheduleDescriptor::Interval { seconds } => Some(Duration::from_secs((*seconds).max(1))),
        ScheduleDescriptor::Cron { expression } => {
            let validated = shared::cron::validate(expression).ok()?;
            let now = chrono::Utc::now();
            let next = validated.next_fire_after(now)?;
            let delta = next.signed_duration_since(now).to_std().ok()?;
            Some(delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_fire_delay_interval() {
        let schedule = ScheduleDescriptor::Interval { seconds: 30 };
        assert_eq!(next_fire_delay(&schedule), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_next_fire_delay_cron() {
        let schedule = ScheduleDescriptor::Cron {
            expression: "0 0 * * * *".to_string(),
        };
        let delay = next_fire_delay(&schedule).unwrap();
        assert!(delay.as_secs() <= 3600);
    }
}
