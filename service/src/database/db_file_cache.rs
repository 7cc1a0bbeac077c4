//! Known-synced-file cache (§4.2 phase 1 diff, §4.6).
//!
//! Lets a sync pass skip re-stat'ing a source file when nothing about it
//! has changed since the last run, and backs the reconstruct-cache
//! procedure that rebuilds this table from a full filesystem scan. Also
//! the authority the deletion subsystem's verification guard consults:
//! a file may only be deleted once this cache positively marks it SYNCED.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Sync status of a single cached file (§4.4 "File-cache entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Synced,
    Skipped,
    Failed,
    Deleted,
}

impl SyncStatus {
    fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Skipped => "SKIPPED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Deleted => "DELETED",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "SYNCED" => SyncStatus::Synced,
            "SKIPPED" => SyncStatus::Skipped,
            "FAILED" => SyncStatus::Failed,
            "DELETED" => SyncStatus::Deleted,
            _ => SyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub source_path: String,
    pub target_path: String,
    pub size: u64,
    pub mtime: i64,
    pub hash: Option<String>,
    pub hash_at: Option<i64>,
    pub sync_status: SyncStatus,
    pub synced_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub last_seen_at: i64,
    pub last_error: Option<String>,
    pub metadata: Option<String>,
}

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS file_cache (
            task_id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            target_path TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            hash TEXT,
            hash_at INTEGER,
            sync_status TEXT NOT NULL DEFAULT 'PENDING',
            synced_at INTEGER,
            deleted_at INTEGER,
            last_seen_at INTEGER NOT NULL,
            last_error TEXT,
            metadata TEXT,
            PRIMARY KEY (task_id, source_path)
        )
        "#,
        [],
    )
    .context("failed to create file_cache table")?;
    Ok(())
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        source_path: row.get(0)?,
        target_path: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        mtime: row.get(3)?,
        hash: row.get(4)?,
        hash_at: row.get(5)?,
        sync_status: SyncStatus::parse(&row.get::<_, String>(6)?),
        synced_at: row.get(7)?,
        deleted_at: row.get(8)?,
        last_seen_at: row.get(9)?,
        last_error: row.get(10)?,
        metadata: row.get(11)?,
    })
}

const SELECT_COLUMNS: &str = "source_path, target_path, size, mtime, hash, hash_at, \
    sync_status, synced_at, deleted_at, last_seen_at, last_error, metadata";

pub fn upsert(conn: &Connection, task_id: Uuid, entry: &CacheEntry) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO file_cache (
            task_id, source_path, target_path, size, mtime, hash, hash_at,
            sync_status, synced_at, deleted_at, last_seen_at, last_error, metadata
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(task_id, source_path) DO UPDATE SET
            target_path = excluded.target_path,
            size = excluded.size,
            mtime = excluded.mtime,
            hash = excluded.hash,
            hash_at = excluded.hash_at,
            sync_status = excluded.sync_status,
            synced_at = excluded.synced_at,
            deleted_at = excluded.deleted_at,
            last_seen_at = excluded.last_seen_at,
            last_error = excluded.last_error,
            metadata = excluded.metadata
        "#,
        params![
            task_id.to_string(),
            entry.source_path,
            entry.target_path,
            entry.size as i64,
            entry.mtime,
            entry.hash,
            entry.hash_at,
            entry.sync_status.as_str(),
            entry.synced_at,
            entry.deleted_at,
            entry.last_seen_at,
            entry.last_error,
            entry.metadata,
        ],
    )?;
    Ok(())
}

/// Upsert many entries for one task inside a single transaction, used by
/// the reconstruct-cache procedure to write its batches of
/// [`shared::defaults::default_reconstruct_batch_size`].
pub fn batch_upsert(conn: &mut Connection, task_id: Uuid, entries: &[CacheEntry]) -> Result<()> {
    let tx = conn.transaction().context("failed to start file_cache batch transaction")?;
    for entry in entries {
        upsert(&tx, task_id, entry)?;
    }
    tx.commit().context("failed to commit file_cache batch")?;
    Ok(())
}

pub fn get(conn: &Connection, task_id: Uuid, source_path: &str) -> Result<Option<CacheEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM file_cache WHERE task_id = ?1 AND source_path = ?2", SELECT_COLUMNS),
        params![task_id.to_string(), source_path],
        row_to_entry,
    )
    .optional_context()
}

/// Whether `source_path` is currently recorded SYNCED for this task — the
/// sole basis the deletion subsystem's verification guard is allowed to
/// act on (§4.4).
pub fn is_synced(conn: &Connection, task_id: Uuid, source_path: &str) -> Result<bool> {
    let status: Option<String> = conn
        .query_row(
            "SELECT sync_status FROM file_cache WHERE task_id = ?1 AND source_path = ?2",
            params![task_id.to_string(), source_path],
            |row| row.get(0),
        )
        .optional_context()?;

    Ok(status.map(|s| SyncStatus::parse(&s) == SyncStatus::Synced).unwrap_or(false))
}

/// Update just the status (and dependent timestamp) of an existing row,
/// without touching size/mtime/hash.
pub fn update_sync_status(
    conn: &Connection,
    task_id: Uuid,
    source_path: &str,
    status: SyncStatus,
    now: i64,
) -> Result<()> {
    match status {
        SyncStatus::Synced => conn.execute(
            "UPDATE file_cache SET sync_status = ?1, synced_at = ?2, last_seen_at = ?2 WHERE task_id = ?3 AND source_path = ?4",
            params![status.as_str(), now, task_id.to_string(), source_path],
        ),
        SyncStatus::Deleted => conn.execute(
            "UPDATE file_cache SET sync_status = ?1, deleted_at = ?2 WHERE task_id = ?3 AND source_path = ?4",
            params![status.as_str(), now, task_id.to_string(), source_path],
        ),
        _ => conn.execute(
            "UPDATE file_cache SET sync_status = ?1, last_seen_at = ?2 WHERE task_id = ?3 AND source_path = ?4",
            params![status.as_str(), now, task_id.to_string(), source_path],
        ),
    }
    .context("failed to update file_cache sync_status")?;
    Ok(())
}

pub fn remove(conn: &Connection, task_id: Uuid, source_path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM file_cache WHERE task_id = ?1 AND source_path = ?2",
        params![task_id.to_string(), source_path],
    )?;
    Ok(())
}

/// All cached source paths known for a task, used to compute the orphan
/// set a sync pass needs to consider for deletion.
pub fn list_source_paths(conn: &Connection, task_id: Uuid) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT source_path FROM file_cache WHERE task_id = ?1")?;
    let rows = stmt.query_map(params![task_id.to_string()], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to list file_cache source paths")
}

/// Drop every cached row for a task, used by the reconstruct-cache
/// procedure before it repopulates the table from a fresh scan in
/// batches of [`shared::defaults::default_reconstruct_batch_size`].
pub fn clear_for_task(conn: &Connection, task_id: Uuid) -> Result<usize> {
    conn.execute(
        "DELETE FROM file_cache WHERE task_id = ?1",
        params![task_id.to_string()],
    )
    .context("failed to clear file_cache for task")
}

trait OptionalContext<T> {
    fn optional_context(self) -> Result<Option<T>>;
}

impl<T> OptionalContext<T> for rusqlite::Result<T> {
    fn optional_context(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("file_cache query failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(status: SyncStatus) -> CacheEntry {
        CacheEntry {
            source_path: "/src/movie.mkv".to_string(),
            target_path: "/dst/movie.mkv".to_string(),
            size: 1024,
            mtime: 12345,
            hash: None,
            hash_at: None,
            sync_status: status,
            synced_at: None,
            deleted_at: None,
            last_seen_at: 12345,
            last_error: None,
            metadata: None,
        }
    }

    #[test]
    fn test_status_roundtrips_through_text_column() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();
        let task_id = Uuid::new_v4();
        upsert(&conn, task_id, &sample_entry(SyncStatus::Failed)).unwrap();

        let fetched = get(&conn, task_id, "/src/movie.mkv").unwrap().unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Failed);
        assert!(!is_synced(&conn, task_id, "/src/movie.mkv").unwrap());
    }

    #[test]
    fn test_is_synced_requires_synced_status() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();
        let task_id = Uuid::new_v4();
        upsert(&conn, task_id, &sample_entry(SyncStatus::Synced)).unwrap();
        assert!(is_synced(&conn, task_id, "/src/movie.mkv").unwrap());
    }

    #[test]
    fn test_update_sync_status_changes_status_only() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();
        let task_id = Uuid::new_v4();
        upsert(&conn, task_id, &sample_entry(SyncStatus::Synced)).unwrap();

        update_sync_status(&conn, task_id, "/src/movie.mkv", SyncStatus::Deleted, 99999).unwrap();
        let fetched = get(&conn, task_id, "/src/movie.mkv").unwrap().unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Deleted);
        assert_eq!(fetched.deleted_at, Some(99999));
        assert_eq!(fetched.size, 1024);
    }

    #[test]
    fn test_batch_upsert_writes_all_entries() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_table(&conn).unwrap();
        let task_id = Uuid::new_v4();

        let mut a = sample_entry(SyncStatus::Synced);
        a.source_path = "/src/a.mkv".to_string();
        let mut b = sample_entry(SyncStatus::Synced);
        b.source_path = "/src/b.mkv".to_string();

        batch_upsert(&mut conn, task_id, &[a, b]).unwrap();
        assert_eq!(list_source_paths(&conn, task_id).unwrap().len(), 2);
    }
}
