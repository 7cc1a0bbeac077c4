//! Typed task and config models.
//!
//! Mirrors the attribute sets of §3 of the specification. Every enum field
//! serializes as an uppercase string on disk (§6.1); deserialization is
//! lenient about case and falls back to a safe default rather than failing
//! the whole document, per the "dynamic typing in the source" design note:
//! the source's untyped dictionaries and string-coerced booleans must not
//! turn a single malformed task into a load failure for the entire file.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::defaults;

/// Per-task state machine (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Idle,
    Queued,
    Running,
    Error,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Idle
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_uppercase().as_str() {
            "QUEUED" => TaskStatus::Queued,
            "RUNNING" => TaskStatus::Running,
            "ERROR" => TaskStatus::Error,
            _ => TaskStatus::Idle,
        })
    }
}

/// A schedule descriptor: either a fixed interval or a cron expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schedule_type")]
pub enum ScheduleDescriptor {
    #[serde(rename = "INTERVAL")]
    Interval { seconds: u64 },
    #[serde(rename = "CRON")]
    Cron { expression: String },
}

impl ScheduleDescriptor {
    /// Validate against the minimum interval for the owning task system.
    pub fn validate(&self, min_interval_secs: u64) -> crate::Result<()> {
        match self {
            ScheduleDescriptor::Interval { seconds } => {
                if *seconds < min_interval_secs {
                    return Err(crate::Error::Validation(format!(
                        "interval schedule must be at least {} seconds, got {}",
                        min_interval_secs, seconds
                    )));
                }
                Ok(())
            }
            ScheduleDescriptor::Cron { expression } => crate::cron::validate(expression).map(|_| ()),
        }
    }
}

/// Extension filter mode (§3 Task sync variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtensionFilterMode {
    #[default]
    None,
    Include,
    Exclude,
}

/// Extension filter: a mode plus the lowercase suffix list it applies to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtensionFilter {
    #[serde(default)]
    pub mode: ExtensionFilterMode,
    #[serde(default)]
    pub suffixes: Vec<String>,
}

impl ExtensionFilter {
    /// Whether a file with the given (lowercased, dot-free) extension
    /// passes this filter. `None` means the file is extensionless.
    pub fn passes(&self, extension: Option<&str>) -> bool {
        match self.mode {
            ExtensionFilterMode::None => true,
            ExtensionFilterMode::Include => extension
                .map(|ext| self.suffixes.iter().any(|s| s.eq_ignore_ascii_case(ext)))
                .unwrap_or(false),
            ExtensionFilterMode::Exclude => extension
                .map(|ext| !self.suffixes.iter().any(|s| s.eq_ignore_ascii_case(ext)))
                .unwrap_or(true),
        }
    }
}

/// Size filter: files outside `[min_bytes, max_bytes]` are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SizeFilter {
    #[serde(default)]
    pub min_bytes: Option<u64>,
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl SizeFilter {
    pub fn passes(&self, size: u64) -> bool {
        if let Some(min) = self.min_bytes {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_bytes {
            if size > max {
                return false;
            }
        }
        true
    }
}

/// Rule flags controlling when an existing target is re-synced (§4.2 step 4).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleFlags {
    #[serde(default)]
    pub sync_if_absent: bool,
    #[serde(default)]
    pub sync_if_size_differs: bool,
    #[serde(default)]
    pub sync_if_source_newer: bool,
    #[serde(default)]
    pub overwrite_all: bool,
}

/// The time base a deletion record's maturation is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeBase {
    #[default]
    SyncComplete,
    FileCreate,
}

/// Deferred-deletion policy for a sync task (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "defaults::default_delay_days")]
    pub delay_days: i64,
    #[serde(default)]
    pub time_base: TimeBase,
    #[serde(default)]
    pub delete_parent: bool,
    #[serde(default = "defaults::default_parent_levels")]
    pub parent_levels: u32,
    #[serde(default)]
    pub force_delete_non_empty: bool,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_days: defaults::default_delay_days(),
            time_base: TimeBase::default(),
            delete_parent: false,
            parent_levels: defaults::default_parent_levels(),
            force_delete_non_empty: false,
        }
    }
}

/// A sync task: replicate `source_path` into `target_path` on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTaskConfig {
    pub id: Uuid,
    pub name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub schedule: ScheduleDescriptor,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_run: Option<i64>,
    #[serde(default)]
    pub rules: RuleFlags,
    #[serde(default = "defaults::default_workers")]
    pub workers: u32,
    #[serde(default)]
    pub slow_storage: bool,
    #[serde(default)]
    pub size_filter: SizeFilter,
    #[serde(default)]
    pub extension_filter: ExtensionFilter,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default = "defaults::default_retry_count")]
    pub retry_count: u32,
}

impl SyncTaskConfig {
    /// Effective worker count: slow-storage targets are clamped to 2.
    pub fn effective_workers(&self) -> u32 {
        if self.slow_storage {
            self.workers.clamp(1, 2)
        } else {
            self.workers.max(1)
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::Validation("task name cannot be empty".into()));
        }
        if self.source_path.as_os_str().is_empty() {
            return Err(crate::Error::Validation("source_path cannot be empty".into()));
        }
        if self.target_path.as_os_str().is_empty() {
            return Err(crate::Error::Validation("target_path cannot be empty".into()));
        }
        self.schedule
            .validate(defaults::default_sync_min_interval_secs())?;
        if let (Some(min), Some(max)) = (self.size_filter.min_bytes, self.size_filter.max_bytes) {
            if min > max {
                return Err(crate::Error::Validation(
                    "size_filter min_bytes cannot exceed max_bytes".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// Stub content mode: what the one line of a `.stub` file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StubContentMode {
    #[default]
    RemoteDownloadUrl,
    RemoteRawUrl,
    RemotePath,
}

/// Behavior flags for a stub task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StubFlags {
    #[serde(default)]
    pub flatten: bool,
    #[serde(default)]
    pub copy_subtitles: bool,
    #[serde(default)]
    pub copy_images: bool,
    #[serde(default)]
    pub copy_nfo: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub sync_server_deletes: bool,
    #[serde(default)]
    pub sync_local_deletes_to_server: bool,
}

/// Credentials for the remote host a stub task draws its listing from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteCredentials {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Smart-protection parameters for a stub task (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartProtectionConfig {
    #[serde(default = "defaults::default_protection_threshold")]
    pub threshold: usize,
    #[serde(default = "defaults::default_grace_scans")]
    pub grace_scans: u32,
}

impl Default for SmartProtectionConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::default_protection_threshold(),
            grace_scans: defaults::default_grace_scans(),
        }
    }
}

/// A stub task: mint redirector files for a remote object tree (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubTaskConfig {
    pub id: Uuid,
    pub name: String,
    pub source_root: String,
    pub target_root: PathBuf,
    pub schedule: ScheduleDescriptor,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_run: Option<i64>,
    pub remote: RemoteCredentials,
    #[serde(default)]
    pub content_mode: StubContentMode,
    #[serde(default)]
    pub flags: StubFlags,
    #[serde(default = "defaults::default_workers")]
    pub workers: u32,
    #[serde(default)]
    pub extension_filter: ExtensionFilter,
    #[serde(default)]
    pub protection: SmartProtectionConfig,
}

impl StubTaskConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::Validation("task name cannot be empty".into()));
        }
        if self.source_root.trim().is_empty() {
            return Err(crate::Error::Validation("source_root cannot be empty".into()));
        }
        crate::utils::validate_url(&self.remote.url)?;
        self.schedule
            .validate(defaults::default_stub_min_interval_secs())?;
        Ok(())
    }
}

/// On-disk shape for one task system's config file (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksFile<T> {
    #[serde(default = "defaults::default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub tasks: Vec<T>,
    #[serde(default)]
    pub last_saved: String,
    /// Historically carried the delete queue inline; actual data now lives
    /// in the metadata store. Kept as an always-empty array for readers
    /// that still expect the field to exist.
    #[serde(default)]
    pub delete_queue: Vec<serde_json::Value>,
}

impl<T> Default for TasksFile<T> {
    fn default() -> Self {
        Self {
            schema_version: defaults::default_schema_version(),
            tasks: Vec::new(),
            last_saved: String::new(),
            delete_queue: Vec::new(),
        }
    }
}

impl<T> TasksFile<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Parse a document leniently: a missing `schema_version` (schema 0)
    /// is migrated forward by normalizing `tasks`/`delete_queue` to arrays;
    /// unknown top-level fields are ignored by serde's default behavior.
    /// Returns the parsed file and whether a migration was applied.
    pub fn parse_lenient(raw: &str) -> crate::Result<(Self, bool)> {
        let mut value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| crate::Error::Config(format!("invalid JSON: {}", e)))?;

        let obj = value
            .as_object_mut()
            .ok_or_else(|| crate::Error::Config("task file must be a JSON object".to_string()))?;

        let had_schema_version = obj.contains_key("schema_version");
        let migrated = !had_schema_version;

        if !obj.get("tasks").map(|v| v.is_array()).unwrap_or(false) {
            obj.insert("tasks".to_string(), serde_json::Value::Array(Vec::new()));
        }
        if !obj
            .get("delete_queue")
            .map(|v| v.is_array())
            .unwrap_or(false)
        {
            obj.insert(
                "delete_queue".to_string(),
                serde_json::Value::Array(Vec::new()),
            );
        }
        if !had_schema_version {
            obj.insert(
                "schema_version".to_string(),
                serde_json::Value::Number(defaults::default_schema_version().into()),
            );
        }

        let parsed: TasksFile<T> = serde_json::from_value(value)
            .map_err(|e| crate::Error::Config(format!("invalid task document: {}", e)))?;

        Ok((parsed, migrated))
    }

    pub fn to_pretty_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("failed to serialize task file: {}", e)))
    }
}

/// Force a task's in-memory status to IDLE, regardless of what was
/// persisted. Invariant: the scheduler never resumes a task as RUNNING or
/// QUEUED across a restart (§4.1 persistence).
pub trait ResetStatus {
    fn reset_status(&mut self);
}

impl ResetStatus for SyncTaskConfig {
    fn reset_status(&mut self) {
        self.status = TaskStatus::Idle;
    }
}

impl ResetStatus for StubTaskConfig {
    fn reset_status(&mut self) {
        self.status = TaskStatus::Idle;
    }
}

impl<T: ResetStatus> TasksFile<T> {
    pub fn reset_all_statuses(&mut self) {
        for task in &mut self.tasks {
            task.reset_status();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_lenient_deserialize() {
        let s: TaskStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(s, TaskStatus::Running);
        let s: TaskStatus = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(s, TaskStatus::Idle);
    }

    #[test]
    fn test_extension_filter_modes() {
        let none = ExtensionFilter {
            mode: ExtensionFilterMode::None,
            suffixes: vec![],
        };
        assert!(none.passes(None));

        let include = ExtensionFilter {
            mode: ExtensionFilterMode::Include,
            suffixes: vec!["mkv".to_string()],
        };
        assert!(include.passes(Some("mkv")));
        assert!(!include.passes(None));

        let exclude = ExtensionFilter {
            mode: ExtensionFilterMode::Exclude,
            suffixes: vec!["nfo".to_string()],
        };
        assert!(exclude.passes(None));
        assert!(!exclude.passes(Some("nfo")));
    }

    #[test]
    fn test_size_filter() {
        let filter = SizeFilter {
            min_bytes: Some(100),
            max_bytes: Some(1000),
        };
        assert!(!filter.passes(50));
        assert!(filter.passes(500));
        assert!(!filter.passes(5000));
    }

    #[test]
    fn test_parse_lenient_missing_schema_version_migrates() {
        let raw = r#"{"tasks": []}"#;
        let (parsed, migrated): (TasksFile<SyncTaskConfig>, bool) =
            TasksFile::parse_lenient(raw).unwrap();
        assert!(migrated);
        assert_eq!(parsed.schema_version, 1);
        assert!(parsed.tasks.is_empty());
    }

    #[test]
    fn test_parse_lenient_missing_file_equivalent() {
        let raw = "{}";
        let (parsed, migrated): (TasksFile<StubTaskConfig>, bool) =
            TasksFile::parse_lenient(raw).unwrap();
        assert!(migrated);
        assert!(parsed.tasks.is_empty());
        assert!(parsed.delete_queue.is_empty());
    }

    #[test]
    fn test_effective_workers_clamped_for_slow_storage() {
        let mut task = SyncTaskConfig {
            id: Uuid::new_v4(),
            name: "t".to_string(),
            source_path: PathBuf::from("/src"),
            target_path: PathBuf::from("/dst"),
            schedule: ScheduleDescriptor::Interval { seconds: 30 },
            enabled: true,
            status: TaskStatus::Idle,
            last_run: None,
            rules: RuleFlags::default(),
            workers: 8,
            slow_storage: true,
            size_filter: SizeFilter::default(),
            extension_filter: ExtensionFilter::default(),
            deletion_policy: DeletionPolicy::default(),
            retry_count: 2,
        };
        assert_eq!(task.effective_workers(), 2);
        task.slow_storage = false;
        assert_eq!(task.effective_workers(), 8);
    }
}
