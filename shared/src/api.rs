//! Control-plane request and response types (§6.4).
//!
//! These are the DTOs the HTTP adapter in the service binary accepts and
//! returns; they deliberately mirror the on-disk task shapes in
//! [`crate::config`] rather than inventing a parallel representation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{
    DeletionPolicy, ExtensionFilter, RemoteCredentials, RuleFlags, ScheduleDescriptor,
    SizeFilter, SmartProtectionConfig, StubContentMode, StubFlags, TaskStatus,
};

/// Generic API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(message),
        }
    }
}

/// Which task system a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskKind {
    Sync,
    Stub,
}

/// Request body to create a sync task; the service assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSyncTaskRequest {
    pub name: String,
    pub source_path: String,
    pub target_path: String,
    pub schedule: ScheduleDescriptor,
    #[serde(default)]
    pub rules: RuleFlags,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub slow_storage: bool,
    #[serde(default)]
    pub size_filter: SizeFilter,
    #[serde(default)]
    pub extension_filter: ExtensionFilter,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

/// Request body to create a stub task; the service assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStubTaskRequest {
    pub name: String,
    pub source_root: String,
    pub target_root: String,
    pub schedule: ScheduleDescriptor,
    pub remote: RemoteCredentials,
    #[serde(default)]
    pub content_mode: StubContentMode,
    #[serde(default)]
    pub flags: StubFlags,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub extension_filter: ExtensionFilter,
    #[serde(default)]
    pub protection: SmartProtectionConfig,
}

/// Summary row returned by the task list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: TaskKind,
    pub enabled: bool,
    pub status: TaskStatus,
    pub last_run: Option<i64>,
    pub next_fire: Option<i64>,
}

/// Body for PATCH .../enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleEnabledRequest {
    pub enabled: bool,
}

/// Body for POST .../trigger. An empty body means a normal run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerOptions {
    /// Force every file to be re-copied regardless of the rule flags
    /// (§4.2 "full overwrite" run mode).
    #[serde(default)]
    pub full_overwrite: bool,
}

/// One row of a run-history query (§4.6 `history` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
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

/// One row of the deferred-deletion queue (§4.4, §4.6 `delete_queue` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub task_id: Uuid,
    pub source_path: String,
    pub enqueued_at: i64,
    pub eligible_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Overall status snapshot returned by GET /api/v1/status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub tasks: Vec<TaskSummary>,
    pub queue_depth: u64,
    pub recent_history: Vec<HistoryEntry>,
}

/// One entry of a local directory listing, used by the task-editor's
/// path picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Query parameters for GET /api/v1/browse.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowseQuery {
    #[serde(default)]
    pub path: String,
}

/// Query parameters for GET /api/v1/logs.
#[derive(Debug, Clone, Deserialize)]
pub struct LogQuery {
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One buffered log line, fed from the tracing subscriber layer (§10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Body for POST /api/v1/cron/validate.
#[derive(Debug, Clone, Deserialize)]
pub struct CronValidateRequest {
    pub expression: String,
}

/// Response for POST /api/v1/cron/validate.
#[derive(Debug, Clone, Serialize)]
pub struct CronValidateResponse {
    pub canonical: String,
}

/// One entry of the cron preset list (GET /api/v1/cron/presets).
#[derive(Debug, Clone, Serialize)]
pub struct CronPresetDto {
    pub label: String,
    pub expression: String,
}

/// Response for GET /api/v1/cron/random.
#[derive(Debug, Clone, Serialize)]
pub struct CronRandomResponse {
    pub expression: String,
}

/// Response for POST .../reconstruct-cache.
#[derive(Debug, Clone, Serialize)]
pub struct ReconstructCacheResponse {
    pub entries_written: usize,
}

/// Control-plane endpoint paths.
pub mod endpoints {
    pub const SYNC_TASKS: &str = "/api/v1/tasks/sync";
    pub const STUB_TASKS: &str = "/api/v1/tasks/stub";
    pub const STATUS: &str = "/api/v1/status";
    pub const QUEUE: &str = "/api/v1/queue";
    pub const LOGS: &str = "/api/v1/logs";
    pub const BROWSE: &str = "/api/v1/browse";
    pub const CRON_VALIDATE: &str = "/api/v1/cron/validate";
    pub const CRON_PRESETS: &str = "/api/v1/cron/presets";
    pub const CRON_RANDOM: &str = "/api/v1/cron/random";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_helpers() {
        let success: ApiResponse<&str> = ApiResponse::success("ok");
        assert_eq!(success.status, "success");
        assert_eq!(success.data, Some("ok"));

        let error: ApiResponse<()> = ApiResponse::error("boom".to_string());
        assert_eq!(error.status, "error");
        assert_eq!(error.error, Some("boom".to_string()));
    }

    #[test]
    fn test_task_kind_serializes_uppercase() {
        let json = serde_json::to_string(&TaskKind::Sync).unwrap();
        assert_eq!(json, "\"SYNC\"");
    }
}
