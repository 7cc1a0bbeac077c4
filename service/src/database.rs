//! Metadata store for the service: the deferred-deletion queue, the
//! known-synced-file cache, run history, and a small key/value table.
//!
//! The service keeps task definitions in JSON documents (see `config.rs`)
//! but everything that is cheaper to query than to re-derive from the
//! filesystem lives here in SQLite, the way the donor agent kept its
//! metric buffer in SQLite rather than in the task files.

mod db_config;
mod db_delete_queue;
mod db_file_cache;
mod db_history;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use db_config as config_kv;
pub use db_delete_queue::QueueRow;
pub use db_file_cache::{CacheEntry, SyncStatus};
pub use db_history::{HistoryRow, RunOutcome};

const DATABASE_FILE: &str = "cloudgather.db";

pub struct Database {
    db_path: PathBuf,
    connection: Option<Connection>,
    busy_timeout_secs: u64,
}

impl Database {
    pub fn new<P: AsRef<Path>>(data_dir: P, busy_timeout_secs: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
        }

        Ok(Self {
            db_path: data_dir.join(DATABASE_FILE),
            connection: None,
            busy_timeout_secs,
        })
    }

    pub fn initialize(&mut self) -> Result<()> {
        info!("initializing metadata store at {}", self.db_path.display());
        let conn = self.get_connection()?;

        db_delete_queue::create_table(conn)?;
        db_file_cache::create_table(conn)?;
        db_history::create_table(conn)?;
        db_config::create_table(conn)?;

        info!("metadata store initialization complete");
        Ok(())
    }

    pub fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)
                .with_context(|| format!("failed to open database: {}", self.db_path.display()))?;

            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .context("failed to enable WAL mode")?;
            conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))
                .context("failed to set WAL auto-checkpoint")?;
            conn.busy_timeout(std::time::Duration::from_secs(self.busy_timeout_secs))
                .context("failed to set busy timeout")?;

            self.connection = Some(conn);
        }

        Ok(self.connection.as_mut().unwrap())
    }

    /// Checkpoint WAL back into the main database file. Returns frames
    /// checkpointed. Called periodically from the background maintenance
    /// loop to bound WAL growth.
    pub fn checkpoint_wal(&mut self) -> Result<i64> {
        let conn = self.get_connection()?;
        let (busy, log_frames, checkpointed): (i64, i64, i64) =
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        if busy > 0 {
            debug!(checkpointed, busy, log_frames, "WAL checkpoint partially blocked");
        } else {
            debug!(checkpointed, "WAL checkpoint complete");
        }

        Ok(checkpointed)
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err((_, e)) = conn.close() {
                warn!("error closing database connection: {:?}", e);
            } else {
                debug!("database connection closed");
            }
        }
    }

    // ---- delete_queue ----

    pub fn enqueue_deletion(
        &mut self,
        task_id: uuid::Uuid,
        source_path: &str,
        now: i64,
        eligible_at: i64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_delete_queue::enqueue(conn, task_id, source_path, now, eligible_at)
    }

    pub fn cancel_deletion(&mut self, task_id: uuid::Uuid, source_path: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_delete_queue::remove(conn, task_id, source_path)
    }

    pub fn discharge_deletion(&mut self, id: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_delete_queue::discharge(conn, id)
    }

    pub fn due_deletions(&mut self, now: i64, limit: usize) -> Result<Vec<QueueRow>> {
        let conn = self.get_connection()?;
        db_delete_queue::fetch_due(conn, now, limit)
    }

    pub fn list_deletions(&mut self, limit: usize) -> Result<Vec<QueueRow>> {
        let conn = self.get_connection()?;
        db_delete_queue::list_all(conn, limit)
    }

    pub fn deletion_queue_depth(&mut self) -> Result<u64> {
        let conn = self.get_connection()?;
        db_delete_queue::count(conn)
    }

    pub fn mark_deletion_failed(&mut self, id: i64, now: i64, error: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_delete_queue::mark_attempt_failed(conn, id, now, error)
    }

    // ---- file_cache ----

    pub fn upsert_cache_entry(&mut self, task_id: uuid::Uuid, entry: &CacheEntry) -> Result<()> {
        let conn = self.get_connection()?;
        db_file_cache::upsert(conn, task_id, entry)
    }

    pub fn get_cache_entry(
        &mut self,
        task_id: uuid::Uuid,
        source_path: &str,
    ) -> Result<Option<CacheEntry>> {
        let conn = self.get_connection()?;
        db_file_cache::get(conn, task_id, source_path)
    }

    pub fn remove_cache_entry(&mut self, task_id: uuid::Uuid, source_path: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_file_cache::remove(conn, task_id, source_path)
    }

    pub fn cached_source_paths(&mut self, task_id: uuid::Uuid) -> Result<Vec<String>> {
        let conn = self.get_connection()?;
        db_file_cache::list_source_paths(conn, task_id)
    }

    /// Drop every cached row for a task ahead of a reconstruct-cache run.
    pub fn clear_cache_for_task(&mut self, task_id: uuid::Uuid) -> Result<usize> {
        let conn = self.get_connection()?;
        db_file_cache::clear_for_task(conn, task_id)
    }

    /// The sole check the deletion subsystem's verification guard may act
    /// on: whether the cache positively records this path SYNCED (§4.4).
    pub fn is_file_synced(&mut self, task_id: uuid::Uuid, source_path: &str) -> Result<bool> {
        let conn = self.get_connection()?;
        db_file_cache::is_synced(conn, task_id, source_path)
    }

    pub fn update_sync_status(
        &mut self,
        task_id: uuid::Uuid,
        source_path: &str,
        status: SyncStatus,
        now: i64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_file_cache::update_sync_status(conn, task_id, source_path, status, now)
    }

    /// Upsert many entries for one task in a single transaction, used by
    /// the reconstruct-cache procedure's batches of
    /// [`shared::defaults::default_reconstruct_batch_size`].
    pub fn batch_upsert_cache_entries(&mut self, task_id: uuid::Uuid, entries: &[CacheEntry]) -> Result<()> {
        let conn = self.get_connection()?;
        db_file_cache::batch_upsert(conn, task_id, entries)
    }

    // ---- history ----

    pub fn start_history_run(
        &mut self,
        task_id: uuid::Uuid,
        task_name: &str,
        now: i64,
    ) -> Result<i64> {
        let conn = self.get_connection()?;
        db_history::start_run(conn, task_id, task_name, now)
    }

    pub fn finish_history_run(
        &mut self,
        history_id: i64,
        now: i64,
        outcome: &RunOutcome,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_history::finish_run(conn, history_id, now, outcome)
    }

    pub fn recent_history(&mut self, limit: usize) -> Result<Vec<HistoryRow>> {
        let conn = self.get_connection()?;
        db_history::recent_all(conn, limit)
    }

    pub fn recent_history_for_task(
        &mut self,
        task_id: uuid::Uuid,
        limit: usize,
    ) -> Result<Vec<HistoryRow>> {
        let conn = self.get_connection()?;
        db_history::recent_for_task(conn, task_id, limit)
    }

    /// Whether `task_id` started a run within `since`, used to suppress a
    /// burst of redundant manual triggers landing inside the same window.
    pub fn has_recent_history_run(&mut self, task_id: uuid::Uuid, since: i64) -> Result<bool> {
        let conn = self.get_connection()?;
        db_history::has_recent_run(conn, task_id, since)
    }

    pub fn cleanup_history_older_than(&mut self, cutoff: i64) -> Result<usize> {
        let conn = self.get_connection()?;
        db_history::cleanup_older_than(conn, cutoff)
    }

    pub fn record_event_history(
        &mut self,
        task_id: uuid::Uuid,
        task_name: &str,
        now: i64,
        result: &str,
        message: Option<&str>,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_history::record_event(conn, task_id, task_name, now, result, message)
    }

    // ---- config_kv ----

    pub fn get_kv(&mut self, key: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        db_config::get(conn, key)
    }

    pub fn set_kv(&mut self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_config::set(conn, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn open_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::new(dir.path(), 5).unwrap();
        db.initialize().unwrap();
        (db, dir)
    }

    #[test]
    fn test_delete_queue_roundtrip() {
        let (mut db, _dir) = open_test_db();
        let task_id = Uuid::new_v4();
        db.enqueue_deletion(task_id, "/media/a.mkv", 0, 100).unwrap();
        assert_eq!(db.due_deletions(50, 10).unwrap().len(), 0);
        let due = db.due_deletions(100, 10).unwrap();
        assert_eq!(due.len(), 1);
        db.discharge_deletion(due[0].id).unwrap();
        assert_eq!(db.deletion_queue_depth().unwrap(), 0);
    }

    #[test]
    fn test_delete_queue_reinstatement_resets() {
        let (mut db, _dir) = open_test_db();
        let task_id = Uuid::new_v4();
        db.enqueue_deletion(task_id, "/media/a.mkv", 0, 100).unwrap();
        db.mark_deletion_failed(
            db.list_deletions(10).unwrap()[0].id,
            50,
            "disk busy",
        )
        .unwrap();
        db.cancel_deletion(task_id, "/media/a.mkv").unwrap();
        assert_eq!(db.deletion_queue_depth().unwrap(), 0);
    }

    #[test]
    fn test_file_cache_roundtrip() {
        let (mut db, _dir) = open_test_db();
        let task_id = Uuid::new_v4();
        let entry = CacheEntry {
            source_path: "/src/movie.mkv".to_string(),
            target_path: "/dst/movie.mkv".to_string(),
            size: 1024,
            mtime: 12345,
            hash: None,
            hash_at: None,
            sync_status: SyncStatus::Synced,
            synced_at: Some(12346),
            deleted_at: None,
            last_seen_at: 12346,
            last_error: None,
            metadata: None,
        };
        db.upsert_cache_entry(task_id, &entry).unwrap();
        let fetched = db.get_cache_entry(task_id, "/src/movie.mkv").unwrap().unwrap();
        assert_eq!(fetched.size, 1024);
        assert!(db.is_file_synced(task_id, "/src/movie.mkv").unwrap());
        db.clear_cache_for_task(task_id).unwrap();
        assert!(db.get_cache_entry(task_id, "/src/movie.mkv").unwrap().is_none());
    }

    #[test]
    fn test_file_cache_failed_entry_is_not_synced() {
        let (mut db, _dir) = open_test_db();
        let task_id = Uuid::new_v4();
        let entry = CacheEntry {
            source_path: "/src/broken.mkv".to_string(),
            target_path: "/dst/broken.mkv".to_string(),
            size: 0,
            mtime: 0,
            hash: None,
            hash_at: None,
            sync_status: SyncStatus::Failed,
            synced_at: None,
            deleted_at: None,
            last_seen_at: 0,
            last_error: Some("disk full".to_string()),
            metadata: None,
        };
        db.upsert_cache_entry(task_id, &entry).unwrap();
        assert!(!db.is_file_synced(task_id, "/src/broken.mkv").unwrap());
    }

    #[test]
    fn test_history_run_lifecycle() {
        let (mut db, _dir) = open_test_db();
        let task_id = Uuid::new_v4();
        let id = db.start_history_run(task_id, "nightly sync", 100).unwrap();
        db.finish_history_run(
            id,
            200,
            &RunOutcome {
                files_processed: 10,
                files_copied: 3,
                files_deleted: 0,
                bytes_transferred: 4096,
                result: "success".to_string(),
                error_message: None,
            },
        )
        .unwrap();

        let rows = db.recent_history_for_task(task_id, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].files_copied, 3);
        assert!(db.has_recent_history_run(task_id, 150).unwrap());
        assert!(!db.has_recent_history_run(task_id, 250).unwrap());
    }

    #[test]
    fn test_config_kv_roundtrip() {
        let (mut db, _dir) = open_test_db();
        assert_eq!(db.get_kv("last_checkpoint").unwrap(), None);
        db.set_kv("last_checkpoint", "100").unwrap();
        assert_eq!(db.get_kv("last_checkpoint").unwrap(), Some("100".to_string()));
        db.set_kv("last_checkpoint", "200").unwrap();
        assert_eq!(db.get_kv("last_checkpoint").unwrap(), Some("200".to_string()));
    }
}
