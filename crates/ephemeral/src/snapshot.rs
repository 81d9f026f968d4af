use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Which capture strategy produced a [`SnapshotMetadata`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStrategy {
    PreExecution,
    PostExecution,
    Incremental,
    Scheduled,
}

/// A captured point-in-time snapshot, independent of whether it is currently
/// mounted into any [`crate::space::EphemeralSpace`].
#[derive(Debug, Clone)]
pub struct SnapshotMetadata {
    pub id: Uuid,
    pub strategy: SnapshotStrategy,
    pub snapshot_name: String,
    pub created_at: DateTime<Utc>,
    pub parent: Option<Uuid>,
    pub changed_files: Vec<PathBuf>,
    pub total_files: u32,
    pub size_bytes: u64,
    pub app_path: Option<PathBuf>,
    pub pid: Option<i32>,
}

impl SnapshotMetadata {
    #[must_use]
    pub fn new(strategy: SnapshotStrategy, app_path: Option<PathBuf>, pid: Option<i32>) -> Self {
        let id = Uuid::new_v4();
        Self {
            snapshot_name: format!("privarion-snap-{id}"),
            created_at: Utc::now(),
            parent: None,
            changed_files: Vec::new(),
            total_files: 0,
            size_bytes: 0,
            app_path,
            pid,
            id,
            strategy,
        }
    }
}

/// A recurring capture schedule: periodic snapshots of `target_path`/`app_path`
/// at `interval`, retaining at most `max_snapshots` and sweeping anything
/// older than `retention_days`.
#[derive(Debug, Clone)]
pub struct SnapshotSchedule {
    pub id: Uuid,
    pub interval: Duration,
    pub target_path: Option<PathBuf>,
    pub app_path: Option<PathBuf>,
    pub max_snapshots: usize,
    pub retention_days: i64,
}

impl SnapshotSchedule {
    #[must_use]
    pub fn new(interval: Duration, max_snapshots: usize, retention_days: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            interval,
            target_path: None,
            app_path: None,
            max_snapshots,
            retention_days,
        }
    }
}
