use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::LaunchConfiguration;

/// Coarse resource accounting collected when
/// [`LaunchConfiguration::enable_resource_monitoring`] is set. Populated on a
/// best-effort basis; fields default to zero when the host does not expose
/// the underlying accounting.
#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    pub max_rss_bytes: u64,
    pub user_cpu_time: Duration,
    pub system_cpu_time: Duration,
}

/// A handle to a process launched into an [`privarion_ephemeral::EphemeralSpace`].
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub id: Uuid,
    pub pid: i32,
    pub space_id: Uuid,
    pub app_path: PathBuf,
    pub launched_at: DateTime<Utc>,
    pub config: LaunchConfiguration,
}

/// The outcome of a completed or terminated launch.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub handle: ProcessHandle,
    pub exit_code: i32,
    pub execution_time: Duration,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub resource_usage: Option<ResourceUsage>,
}
