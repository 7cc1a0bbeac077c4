//! Default values for configuration parameters
//!
//! Centralizes all default-value functions used by the configuration
//! structures, invoked by serde when deserializing documents that omit
//! optional fields.

/// Default worker count for a sync task.
pub fn default_workers() -> u32 {
    1
}

/// Default retry count for a single file copy.
pub fn default_retry_count() -> u32 {
    2
}

/// Default deletion delay in days.
pub fn default_delay_days() -> i64 {
    0
}

/// Default parent-pruning depth.
pub fn default_parent_levels() -> u32 {
    0
}

/// Default smart-protection threshold (orphan count that trips protection).
pub fn default_protection_threshold() -> usize {
    100
}

/// Default smart-protection grace scan count.
pub fn default_grace_scans() -> u32 {
    3
}

/// Default remote-host request timeout, seconds.
pub fn default_remote_timeout_secs() -> u64 {
    30
}

/// Default remote-host retry count for 429/5xx responses.
pub fn default_remote_max_retries() -> u32 {
    3
}

/// Default listing page size for the remote-host capability.
pub fn default_remote_page_size() -> u32 {
    100
}

/// Default stability dwell, seconds, for the sync engine's two-read check.
pub fn default_stability_dwell_secs() -> u64 {
    5
}

/// Default minimum interval for a sync task, seconds.
pub fn default_sync_min_interval_secs() -> u64 {
    5
}

/// Default minimum interval for a stub task, seconds.
pub fn default_stub_min_interval_secs() -> u64 {
    60
}

/// Default scheduler graceful-shutdown timeout, seconds.
pub fn default_graceful_shutdown_timeout_secs() -> u64 {
    5
}

/// Default dispatch-queue poll interval, milliseconds, used so the
/// consumer can observe a shutdown flag without blocking indefinitely.
pub fn default_dispatch_poll_millis() -> u64 {
    1000
}

/// Default metadata-store busy timeout, seconds.
pub fn default_database_busy_timeout_secs() -> u64 {
    5
}

/// Default history dedup window, seconds.
pub fn default_history_dedup_window_secs() -> i64 {
    60
}

/// Default log ring-buffer capacity per bucket.
pub fn default_log_buffer_capacity() -> usize {
    500
}

/// Default batch size for the reconstruct-cache procedure.
pub fn default_reconstruct_batch_size() -> usize {
    500
}

/// Default recent-history rows returned by the status snapshot.
pub fn default_status_history_rows() -> usize {
    20
}

/// Default listen address for the control-plane HTTP adapter.
pub fn default_listen_address() -> String {
    "127.0.0.1:8420".to_string()
}

/// Default schema version for newly written task files.
pub fn default_schema_version() -> u32 {
    1
}
