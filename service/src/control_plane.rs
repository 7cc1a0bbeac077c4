//! HTTP control plane (§6.4): the local UI/CLI talks to the running
//! service exclusively through this router. Every handler defers real
//! work to the [`crate::scheduler::Scheduler`] and [`crate::database::Database`].

use crate::database::Database;
use crate::log_buffer::LogBuffer;
use crate::scheduler::{Scheduler, TaskSystem};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use shared::api::{
    endpoints, ApiResponse, BrowseQuery, CronPresetDto, CronRandomResponse, CronValidateRequest,
    CronValidateResponse, DirectoryEntry, HistoryEntry, LogQuery, NewStubTaskRequest,
    NewSyncTaskRequest, QueueEntry, ReconstructCacheResponse, StatusSnapshot, TaskKind,
    TaskSummary, ToggleEnabledRequest, TriggerOptions,
};
use shared::config::{StubTaskConfig, SyncTaskConfig};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub database: Arc<tokio::sync::Mutex<Database>>,
    pub log_buffer: Arc<LogBuffer>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            endpoints::SYNC_TASKS,
            get(list_sync_tasks).post(create_sync_task),
        )
        .route(
            endpoints::STUB_TASKS,
            get(list_stub_tasks).post(create_stub_task),
        )
        .route(
            "/api/v1/tasks/sync/:id",
            get(get_sync_task).put(update_sync_task).delete(delete_sync_task),
        )
        .route(
            "/api/v1/tasks/stub/:id",
            get(get_stub_task).put(update_stub_task).delete(delete_stub_task),
        )
        .route("/api/v1/tasks/sync/:id/enabled", patch(set_sync_enabled))
        .route("/api/v1/tasks/stub/:id/enabled", patch(set_stub_enabled))
        .route("/api/v1/tasks/sync/:id/trigger", post(trigger_sync))
        .route("/api/v1/tasks/stub/:id/trigger", post(trigger_stub))
        .route(
            "/api/v1/tasks/sync/:id/reconstruct-cache",
            post(reconstruct_cache),
        )
        .route(endpoints::STATUS, get(get_status))
        .route(endpoints::QUEUE, get(get_queue))
        .route(endpoints::LOGS, get(get_logs))
        .route(endpoints::BROWSE, get(browse))
        .route(endpoints::CRON_VALIDATE, post(validate_cron))
        .route(endpoints::CRON_PRESETS, get(cron_presets))
        .route(endpoints::CRON_RANDOM, get(cron_random))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cloudgather",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn next_fire_placeholder(_task_id: Uuid) -> Option<i64> {
    None
}

async fn list_sync_tasks(State(state): State<AppState>) -> Json<ApiResponse<Vec<TaskSummary>>> {
    let tasks = state.scheduler.get_sync_tasks().await;
    let summaries = tasks
        .into_iter()
        .map(|t| TaskSummary {
            id: t.id,
            name: t.name,
            kind: TaskKind::Sync,
            enabled: t.enabled,
            status: t.status,
            last_run: t.last_run,
            next_fire: next_fire_placeholder(t.id),
        })
        .collect();
    Json(ApiResponse::success(summaries))
}

async fn list_stub_tasks(State(state): State<AppState>) -> Json<ApiResponse<Vec<TaskSummary>>> {
    let tasks = state.scheduler.get_stub_tasks().await;
    let summaries = tasks
        .into_iter()
        .map(|t| TaskSummary {
            id: t.id,
            name: t.name,
            kind: TaskKind::Stub,
            enabled: t.enabled,
            status: t.status,
            last_run: t.last_run,
            next_fire: next_fire_placeholder(t.id),
        })
        .collect();
    Json(ApiResponse::success(summaries))
}

async fn create_sync_task(
    State(state): State<AppState>,
    Json(request): Json<NewSyncTaskRequest>,
) -> Result<Json<ApiResponse<Uuid>>, ApiError> {
    let task = SyncTaskConfig {
        id: Uuid::new_v4(),
        name: request.name,
        source_path: request.source_path.into(),
        target_path: request.target_path.into(),
        schedule: request.schedule,
        enabled: true,
        status: shared::config::TaskStatus::Idle,
        last_run: None,
        rules: request.rules,
        workers: request.workers.unwrap_or_else(shared::defaults::default_workers),
        slow_storage: request.slow_storage,
        size_filter: request.size_filter,
        extension_filter: request.extension_filter,
        deletion_policy: request.deletion_policy,
        retry_count: shared::defaults::default_retry_count(),
    };
    let id = task.id;

    state
        .scheduler
        .add_sync_task(task)
        .await
        .map_err(ApiError::BadRequest)?;

    info!(%id, "created sync task");
    Ok(Json(ApiResponse::success(id)))
}

async fn create_stub_task(
    State(state): State<AppState>,
    Json(request): Json<NewStubTaskRequest>,
) -> Result<Json<ApiResponse<Uuid>>, ApiError> {
    let task = StubTaskConfig {
        id: Uuid::new_v4(),
        name: request.name,
        source_root: request.source_root,
        target_root: request.target_root.into(),
        schedule: request.schedule,
        enabled: true,
        status: shared::config::TaskStatus::Idle,
        last_run: None,
        remote: request.remote,
        content_mode: request.content_mode,
        flags: request.flags,
        workers: request.workers.unwrap_or_else(shared::defaults::default_workers),
        extension_filter: request.extension_filter,
        protection: request.protection,
    };
    let id = task.id;

    state
        .scheduler
        .add_stub_task(task)
        .await
        .map_err(ApiError::BadRequest)?;

    info!(%id, "created stub task");
    Ok(Json(ApiResponse::success(id)))
}

async fn delete_sync_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state
        .scheduler
        .remove_task(TaskSystem::Sync, id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ApiResponse::success(())))
}

async fn delete_stub_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state
        .scheduler
        .remove_task(TaskSystem::Stub, id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ApiResponse::success(())))
}

async fn get_sync_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<SyncTaskConfig>>, ApiError> {
    state
        .scheduler
        .get_sync_task(id)
        .await
        .map(|t| Json(ApiResponse::success(t)))
        .ok_or_else(|| ApiError::BadRequest(format!("sync task {} not found", id)))
}

async fn get_stub_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<StubTaskConfig>>, ApiError> {
    state
        .scheduler
        .get_stub_task(id)
        .await
        .map(|t| Json(ApiResponse::success(t)))
        .ok_or_else(|| ApiError::BadRequest(format!("stub task {} not found", id)))
}

async fn update_sync_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<NewSyncTaskRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let existing = state
        .scheduler
        .get_sync_task(id)
        .await
        .ok_or_else(|| ApiError::BadRequest(format!("sync task {} not found", id)))?;

    let updated = SyncTaskConfig {
        id,
        name: request.name,
        source_path: request.source_path.into(),
        target_path: request.target_path.into(),
        schedule: request.schedule,
        enabled: existing.enabled,
        status: existing.status,
        last_run: existing.last_run,
        rules: request.rules,
        workers: request.workers.unwrap_or_else(shared::defaults::default_workers),
        slow_storage: request.slow_storage,
        size_filter: request.size_filter,
        extension_filter: request.extension_filter,
        deletion_policy: request.deletion_policy,
        retry_count: existing.retry_count,
    };

    state
        .scheduler
        .update_sync_task(id, updated)
        .await
        .map_err(ApiError::BadRequest)?;
    Ok(Json(ApiResponse::success(())))
}

async fn update_stub_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<NewStubTaskRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let existing = state
        .scheduler
        .get_stub_task(id)
        .await
        .ok_or_else(|| ApiError::BadRequest(format!("stub task {} not found", id)))?;

    let updated = StubTaskConfig {
        id,
        name: request.name,
        source_root: request.source_root,
        target_root: request.target_root.into(),
        schedule: request.schedule,
        enabled: existing.enabled,
        status: existing.status,
        last_run: existing.last_run,
        remote: request.remote,
        content_mode: request.content_mode,
        flags: request.flags,
        workers: request.workers.unwrap_or_else(shared::defaults::default_workers),
        extension_filter: request.extension_filter,
        protection: request.protection,
    };

    state
        .scheduler
        .update_stub_task(id, updated)
        .await
        .map_err(ApiError::BadRequest)?;
    Ok(Json(ApiResponse::success(())))
}

async fn reconstruct_cache(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ReconstructCacheResponse>>, ApiError> {
    let entries_written = state
        .scheduler
        .reconstruct_cache(id)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(ApiResponse::success(ReconstructCacheResponse {
        entries_written,
    })))
}

async fn set_sync_enabled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ToggleEnabledRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state
        .scheduler
        .set_enabled(TaskSystem::Sync, id, body.enabled)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ApiResponse::success(())))
}

async fn set_stub_enabled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ToggleEnabledRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state
        .scheduler
        .set_enabled(TaskSystem::Stub, id, body.enabled)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(ApiResponse::success(())))
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<TriggerOptions>>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    state
        .scheduler
        .trigger_now(TaskSystem::Sync, id, options.full_overwrite)
        .await
        .map_err(ApiError::BadRequest)?;
    Ok(Json(ApiResponse::success(())))
}

async fn trigger_stub(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<TriggerOptions>>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    state
        .scheduler
        .trigger_now(TaskSystem::Stub, id, options.full_overwrite)
        .await
        .map_err(ApiError::BadRequest)?;
    Ok(Json(ApiResponse::success(())))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<ApiResponse<StatusSnapshot>>, ApiError> {
    let sync_tasks = state.scheduler.get_sync_tasks().await;
    let stub_tasks = state.scheduler.get_stub_tasks().await;

    let mut tasks: Vec<TaskSummary> = sync_tasks
        .into_iter()
        .map(|t| TaskSummary {
            id: t.id,
            name: t.name,
            kind: TaskKind::Sync,
            enabled: t.enabled,
            status: t.status,
            last_run: t.last_run,
            next_fire: next_fire_placeholder(t.id),
        })
        .collect();
    tasks.extend(stub_tasks.into_iter().map(|t| TaskSummary {
        id: t.id,
        name: t.name,
        kind: TaskKind::Stub,
        enabled: t.enabled,
        status: t.status,
        last_run: t.last_run,
        next_fire: next_fire_placeholder(t.id),
    }));

    let queue_depth = state.scheduler.queue_size().await;

    let recent_history = {
        let mut db = state.database.lock().await;
        db.recent_history(shared::defaults::default_status_history_rows())
            .map_err(|e| ApiError::Internal(e.to_string()))?
    };

    let recent_history = recent_history
        .into_iter()
        .map(|h| HistoryEntry {
            task_id: h.task_id,
            task_name: h.task_name,
            started_at: h.started_at,
            finished_at: h.finished_at,
            files_processed: h.files_processed,
            files_copied: h.files_copied,
            files_deleted: h.files_deleted,
            bytes_transferred: h.bytes_transferred,
            result: h.result,
            error_message: h.error_message,
        })
        .collect();

    Ok(Json(ApiResponse::success(StatusSnapshot {
        tasks,
        queue_depth,
        recent_history,
    })))
}

async fn get_queue(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<QueueEntry>>>, ApiError> {
    let mut db = state.database.lock().await;
    let rows = db
        .list_deletions(10_000)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let entries = rows
        .into_iter()
        .map(|r| QueueEntry {
            id: r.id,
            task_id: r.task_id,
            source_path: r.source_path,
            enqueued_at: r.enqueued_at,
            eligible_at: r.eligible_at,
            attempts: r.attempts,
            last_error: r.last_error,
        })
        .collect();

    Ok(Json(ApiResponse::success(entries)))
}

async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Json<ApiResponse<Vec<shared::api::LogLine>>> {
    let limit = query.limit.unwrap_or(shared::defaults::default_log_buffer_capacity());
    let task_id = query.task_id.map(|id| id.to_string());
    let lines = state.log_buffer.recent(task_id.as_deref(), limit);
    Json(ApiResponse::success(lines))
}

async fn browse(Query(query): Query<BrowseQuery>) -> Result<Json<ApiResponse<Vec<DirectoryEntry>>>, ApiError> {
    let path = if query.path.is_empty() {
        std::path::PathBuf::from("/")
    } else {
        let sanitized = shared::utils::sanitize_file_path(&query.path)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        std::path::Path::new("/").join(sanitized)
    };

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&path)
        .await
        .map_err(|e| ApiError::BadRequest(format!("cannot read {}: {}", path.display(), e)))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        entries.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path().to_string_lossy().to_string(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
    Ok(Json(ApiResponse::success(entries)))
}

async fn validate_cron(
    Json(request): Json<CronValidateRequest>,
) -> Result<Json<ApiResponse<CronValidateResponse>>, ApiError> {
    let validated = shared::cron::validate(&request.expression).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(ApiResponse::success(CronValidateResponse {
        canonical: validated.canonical,
    })))
}

async fn cron_random() -> Json<ApiResponse<CronRandomResponse>> {
    Json(ApiResponse::success(CronRandomResponse {
        expression: shared::cron::random_preset_expression().to_string(),
    }))
}

async fn cron_presets() -> Json<ApiResponse<Vec<CronPresetDto>>> {
    let presets = shared::cron::PRESETS
        .iter()
        .map(|p| CronPresetDto {
            label: p.label.to_string(),
            expression: p.expression.to_string(),
        })
        .collect();
    Json(ApiResponse::success(presets))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Internal(m) => {
                error!(error = %m, "control plane internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
        };
        let body = Json(ApiResponse::<()>::error(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_fire_placeholder_is_none() {
        assert_eq!(next_fire_placeholder(Uuid::new_v4()), None);
    }
}
