//! Deferred-deletion queue table (§4.4, §4.6).

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::warn;
use uuid::Uuid;

/// Retry backoff applied to a failed deletion attempt, seconds.
const RETRY_DELAY_SECS: i64 = 3600;

/// Maximum attempts before a deletion is left in place and flagged.
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub task_id: Uuid,
    pub source_path: String,
    pub enqueued_at: i64,
    pub eligible_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS delete_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            eligible_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            UNIQUE(task_id, source_path)
        )
        "#,
        [],
    )
    .context("failed to create delete_queue table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_delete_queue_eligible ON delete_queue(eligible_at)",
        [],
    )?;

    Ok(())
}

/// Add a source path to the queue, or reset its maturation clock if it was
/// already queued (a file that reappeared and vanished again, §4.4 edge
/// case).
pub fn enqueue(
    conn: &Connection,
    task_id: Uuid,
    source_path: &str,
    now: i64,
    eligible_at: i64,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO delete_queue (task_id, source_path, enqueued_at, eligible_at, attempts)
        VALUES (?1, ?2, ?3, ?4, 0)
        ON CONFLICT(task_id, source_path) DO UPDATE SET
            eligible_at = excluded.eligible_at,
            attempts = 0,
            last_error = NULL
        "#,
        params![task_id.to_string(), source_path, now, eligible_at],
    )?;
    Ok(())
}

/// Remove an entry, used when the source file has reappeared (§4.4).
pub fn remove(conn: &Connection, task_id: Uuid, source_path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM delete_queue WHERE task_id = ?1 AND source_path = ?2",
        params![task_id.to_string(), source_path],
    )?;
    Ok(())
}

pub fn discharge(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM delete_queue WHERE id = ?1", params![id])?;
    Ok(())
}

/// Entries whose maturation delay has elapsed and whose retry attempts
/// have not been exhausted.
pub fn fetch_due(conn: &Connection, now: i64, limit: usize) -> Result<Vec<QueueRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, task_id, source_path, enqueued_at, eligible_at, attempts, last_error
        FROM delete_queue
        WHERE eligible_at <= ?1 AND attempts < ?2
        ORDER BY eligible_at ASC
        LIMIT ?3
        "#,
    )?;

    let rows = stmt.query_map(params![now, MAX_ATTEMPTS, limit as i64], |row| {
        let task_id_str: String = row.get(1)?;
        Ok(QueueRow {
            id: row.get(0)?,
            task_id: Uuid::parse_str(&task_id_str).unwrap_or_default(),
            source_path: row.get(2)?,
            enqueued_at: row.get(3)?,
            eligible_at: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to fetch due delete_queue entries")
}

pub fn list_all(conn: &Connection, limit: usize) -> Result<Vec<QueueRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, task_id, source_path, enqueued_at, eligible_at, attempts, last_error
        FROM delete_queue
        ORDER BY eligible_at ASC
        LIMIT ?1
        "#,
    )?;

    let rows = stmt.query_map(params![limit as i64], |row| {
        let task_id_str: String = row.get(1)?;
        Ok(QueueRow {
            id: row.get(0)?,
            task_id: Uuid::parse_str(&task_id_str).unwrap_or_default(),
            source_path: row.get(2)?,
            enqueued_at: row.get(3)?,
            eligible_at: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to list delete_queue entries")
}

pub fn count(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM delete_queue", [], |row| row.get(0))
        .map(|n: i64| n as u64)
        .context("failed to count delete_queue entries")
}

/// Record a failed delete attempt and push its eligible time back.
pub fn mark_attempt_failed(conn: &Connection, id: i64, now: i64, error: &str) -> Result<()> {
    conn.execute(
        r#"
        UPDATE delete_queue
        SET attempts = attempts + 1, eligible_at = ?2, last_error = ?3
        WHERE id = ?1
        "#,
        params![id, now + RETRY_DELAY_SECS, error],
    )?;
    warn!(queue_id = id, error, "delete attempt failed, will retry");
    Ok(())
}
