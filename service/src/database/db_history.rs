//! Run-history table: one row per task execution (§4.6).

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: i64,
    pub task_id: Uuid,
    pub task_name: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub files_processed: u64,
    pub files_copied: u64,
    pub files_deleted: u64,
    pub bytes_transferred: u64,
    pub result: String,
    pub error_message: Option<String>,
}

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            task_name TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            files_processed INTEGER NOT NULL DEFAULT 0,
            files_copied INTEGER NOT NULL DEFAULT 0,
            files_deleted INTEGER NOT NULL DEFAULT 0,
            bytes_transferred INTEGER NOT NULL DEFAULT 0,
            result TEXT NOT NULL DEFAULT 'running',
            error_message TEXT
        )
        "#,
        [],
    )
    .context("failed to create history table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_task ON history(task_id, started_at)",
        [],
    )?;

    Ok(())
}

/// Record the start of a run, returning its row id.
pub fn start_run(conn: &Connection, task_id: Uuid, task_name: &str, now: i64) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO history (task_id, task_name, started_at, result)
        VALUES (?1, ?2, ?3, 'running')
        "#,
        params![task_id.to_string(), task_name, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A run's outcome counters, recorded when it finishes.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub files_processed: u64,
    pub files_copied: u64,
    pub files_deleted: u64,
    pub bytes_transferred: u64,
    pub result: String,
    pub error_message: Option<String>,
}

pub fn finish_run(conn: &Connection, history_id: i64, now: i64, outcome: &RunOutcome) -> Result<()> {
    conn.execute(
        r#"
        UPDATE history
        SET finished_at = ?2,
            files_processed = ?3,
            files_copied = ?4,
            files_deleted = ?5,
            bytes_transferred = ?6,
            result = ?7,
            error_message = ?8
        WHERE id = ?1
        "#,
        params![
            history_id,
            now,
            outcome.files_processed as i64,
            outcome.files_copied as i64,
            outcome.files_deleted as i64,
            outcome.bytes_transferred as i64,
            outcome.result,
            outcome.error_message,
        ],
    )?;
    Ok(())
}

fn row_from(row: &rusqlite::Row) -> rusqlite::Result<HistoryRow> {
    let task_id_str: String = row.get(1)?;
    Ok(HistoryRow {
        id: row.get(0)?,
        task_id: Uuid::parse_str(&task_id_str).unwrap_or_default(),
        task_name: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        files_processed: row.get::<_, i64>(5)? as u64,
        files_copied: row.get::<_, i64>(6)? as u64,
        files_deleted: row.get::<_, i64>(7)? as u64,
        bytes_transferred: row.get::<_, i64>(8)? as u64,
        result: row.get(9)?,
        error_message: row.get(10)?,
    })
}

const SELECT_COLUMNS: &str = "id, task_id, task_name, started_at, finished_at, \
    files_processed, files_copied, files_deleted, bytes_transferred, result, error_message";

/// Most recent runs across all tasks, newest first.
pub fn recent_all(conn: &Connection, limit: usize) -> Result<Vec<HistoryRow>> {
    let sql = format!(
        "SELECT {} FROM history ORDER BY started_at DESC LIMIT ?1",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit as i64], row_from)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to query recent history")
}

/// Most recent runs for a single task, newest first.
pub fn recent_for_task(conn: &Connection, task_id: Uuid, limit: usize) -> Result<Vec<HistoryRow>> {
    let sql = format!(
        "SELECT {} FROM history WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![task_id.to_string(), limit as i64], row_from)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to query task history")
}

/// Whether a run for this task started within the dedup window, used to
/// collapse back-to-back manual triggers into a single history row
/// (§4.1 "at-most-one-running" plus burst suppression).
pub fn has_recent_run(conn: &Connection, task_id: Uuid, since: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM history WHERE task_id = ?1 AND started_at >= ?2",
        params![task_id.to_string(), since],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn cleanup_older_than(conn: &Connection, cutoff: i64) -> Result<usize> {
    conn.execute("DELETE FROM history WHERE started_at < ?1", params![cutoff])
        .context("failed to clean up old history rows")
}

/// Append a single already-finished audit row with an arbitrary `result`
/// tag, used by things that aren't a scheduled task execution but still
/// need an audit trail entry: the reconstruct-cache procedure (`info`) and
/// the deletion subsystem's discharge pass (`DELETED`) (§4.1, §4.4).
pub fn record_event(conn: &Connection, task_id: Uuid, task_name: &str, now: i64, result: &str, message: Option<&str>) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO history (task_id, task_name, started_at, finished_at, result, error_message)
        VALUES (?1, ?2, ?3, ?3, ?4, ?5)
        "#,
        params![task_id.to_string(), task_name, now, result, message],
    )?;
    Ok(())
}
