//! CloudGather service entry point.
//!
//! Bootstraps the metadata store, loads both task registries, starts the
//! scheduler, and serves the local control plane, all in one process.

#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use service::config::ConfigManager;
use service::database::{self, Database};
use service::log_buffer::{BufferLayer, LogBuffer};
use service::scheduler::Scheduler;
use service::{control_plane, sync_engine};

#[derive(Parser, Debug)]
#[command(name = "cloudgather")]
#[command(about = "Local directory sync, remote stub generation, and deferred deletion", long_about = None)]
struct CliArgs {
    /// Directory holding sync_tasks.json / stub_tasks.json
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,

    /// Directory holding cloudgather.db (defaults to a `data` sibling of CONFIG_DIR)
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Control-plane listen address, overriding the built-in default
    #[arg(long = "listen", value_name = "HOST:PORT")]
    listen_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let log_buffer = Arc::new(LogBuffer::new(shared::defaults::default_log_buffer_capacity()));

    let file_appender = tracing_appender::rolling::daily("./logs", "cloudgather.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("service=info,shared=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(non_blocking),
        )
        .with(BufferLayer::new(log_buffer.clone()))
        .init();

    info!("cloudgather starting up");
    info!(config_dir = %cli_args.config_dir.display(), "configuration directory");

    match run(cli_args, log_buffer).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("fatal startup error: {}", e);
            let mut source = e.source();
            while let Some(err) = source {
                error!("  caused by: {}", err);
                source = err.source();
            }
            std::process::exit(1);
        }
    }
}

async fn run(cli_args: CliArgs, log_buffer: Arc<LogBuffer>) -> Result<()> {
    let data_dir = cli_args
        .data_dir
        .unwrap_or_else(|| cli_args.config_dir.parent().map(|p| p.join("data")).unwrap_or_else(|| PathBuf::from("./data")));
    info!(data_dir = %data_dir.display(), "data directory");

    let mut config_manager = ConfigManager::new(cli_args.config_dir.clone())
        .context("failed to initialize config manager")?;

    let sync_tasks = config_manager
        .load_sync_tasks()
        .await
        .context("failed to load sync_tasks.json")?;
    let stub_tasks = config_manager
        .load_stub_tasks()
        .await
        .context("failed to load stub_tasks.json")?;

    info!(
        sync_task_count = sync_tasks.tasks.len(),
        stub_task_count = stub_tasks.tasks.len(),
        "task registries loaded"
    );

    let mut database = Database::new(&data_dir, shared::defaults::default_database_busy_timeout_secs())
        .context("failed to open metadata store")?;
    database.initialize().context("failed to initialize metadata store schema")?;

    auto_migrate_cache(&mut database, &sync_tasks.tasks)?;

    let scheduler = Arc::new(Scheduler::new(
        sync_tasks,
        stub_tasks,
        config_manager,
        database,
        shared::defaults::default_remote_timeout_secs(),
    ));

    scheduler.start().await.context("failed to start scheduler")?;

    let app_state = control_plane::AppState {
        scheduler: scheduler.clone(),
        database: scheduler.database_handle(),
        log_buffer,
    };
    let router = control_plane::create_router(app_state);

    let listen_address = cli_args
        .listen_address
        .unwrap_or_else(shared::defaults::default_listen_address);
    let listener = tokio::net::TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("failed to bind control plane to {}", listen_address))?;
    info!(address = %listen_address, "control plane listening");

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            info!("received Ctrl+C");
        }
    };

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!("control plane server error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    scheduler.stop().await.context("failed to stop scheduler cleanly")?;
    info!("cloudgather shutdown complete");
    Ok(())
}

/// Auto-migration on boot (§4.1): if a sync task's cache is empty but its
/// target tree already has files, rebuild the cache from the filesystem
/// instead of starting as if nothing had ever synced.
fn auto_migrate_cache(database: &mut Database, sync_tasks: &[shared::config::SyncTaskConfig]) -> Result<()> {
    for task in sync_tasks {
        let existing = database
            .cached_source_paths(task.id)
            .with_context(|| format!("failed to query cache for task {}", task.id))?;

        if !existing.is_empty() || !task.target_path.exists() {
            continue;
        }

        let candidates = sync_engine::reconstruct_candidates(&task.target_path, &task.source_path);
        if candidates.is_empty() {
            continue;
        }

        info!(
            task_id = %task.id,
            task_name = %task.name,
            count = candidates.len(),
            "reconstructing file cache from target tree"
        );

        let now = shared::utils::current_timestamp();
        let batch_size = shared::defaults::default_reconstruct_batch_size();
        for chunk in candidates.chunks(batch_size) {
            let entries: Vec<database::CacheEntry> = chunk
                .iter()
                .map(|(source, target, size, mtime)| database::CacheEntry {
                    source_path: source.to_string_lossy().to_string(),
                    target_path: target.to_string_lossy().to_string(),
                    size: *size,
                    mtime: *mtime,
                    hash: None,
                    hash_at: None,
                    sync_status: database::SyncStatus::Synced,
                    synced_at: Some(now),
                    deleted_at: None,
                    last_seen_at: now,
                    last_error: None,
                    metadata: Some("reconstructed".to_string()),
                })
                .collect();
            database.batch_upsert_cache_entries(task.id, &entries)?;
        }

        database.record_event_history(
            task.id,
            &task.name,
            now,
            "info",
            Some(&format!("reconstructed {} file_cache entries from target tree", candidates.len())),
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_cli_parses_config_dir() {
        use super::CliArgs;
        use clap::Parser;
        let args = CliArgs::parse_from(["cloudgather", "/etc/cloudgather"]);
        assert_eq!(args.config_dir, std::path::PathBuf::from("/etc/cloudgather"));
    }
}
