use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use privarion_backends::{CommandExecutor, SnapshotBackend};
use privarion_core::PrivarionError;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::registry::{SnapshotRegistry, SpaceRegistry};
use crate::snapshot::{SnapshotMetadata, SnapshotSchedule, SnapshotStrategy};
use crate::space::{EphemeralSpace, SpaceState};

const SNAPSHOT_CREATE_BUDGET: Duration = Duration::from_millis(100);
const SNAPSHOT_DELETE_BUDGET: Duration = Duration::from_millis(200);
const MOUNT_BUDGET: Duration = Duration::from_millis(50);

fn warn_if_over_budget(op: &str, elapsed: Duration, budget: Duration) {
    if elapsed > budget {
        warn!(op, ?elapsed, ?budget, "operation exceeded its performance budget");
    }
}

/// Configuration for [`EphemeralFileSystemManager`].
#[derive(Debug, Clone)]
pub struct EphemeralFileSystemManagerConfig {
    pub base_path: PathBuf,
    pub max_ephemeral_spaces: usize,
    /// Bypasses the real [`SnapshotBackend`]/filesystem side effects with
    /// deterministic sleeps, for exercising timers in tests.
    pub test_mode: bool,
}

impl Default for EphemeralFileSystemManagerConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/tmp/privarion/spaces"),
            max_ephemeral_spaces: 20,
            test_mode: false,
        }
    }
}

/// Baseline file listing captured at `create_pre_execution`/incremental time,
/// used to compute a best-effort changed-files diff for the matching
/// post-execution or next-incremental snapshot.
struct Baseline {
    root: PathBuf,
    files: Vec<PathBuf>,
}

/// Owns every [`EphemeralSpace`] and [`SnapshotMetadata`] on the host,
/// driving them through a [`SnapshotBackend`] and [`CommandExecutor`].
pub struct EphemeralFileSystemManager {
    config: EphemeralFileSystemManagerConfig,
    snapshot_backend: Arc<dyn SnapshotBackend>,
    executor: Arc<dyn CommandExecutor>,
    spaces: SpaceRegistry,
    snapshots: SnapshotRegistry,
    baselines: Mutex<std::collections::HashMap<Uuid, Baseline>>,
}

impl EphemeralFileSystemManager {
    #[must_use]
    pub fn new(
        config: EphemeralFileSystemManagerConfig,
        snapshot_backend: Arc<dyn SnapshotBackend>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let capacity = config.max_ephemeral_spaces;
        Self {
            config,
            snapshot_backend,
            executor,
            spaces: SpaceRegistry::new(capacity),
            snapshots: SnapshotRegistry::new(),
            baselines: Mutex::new(std::collections::HashMap::new()),
        }
    }

    #[must_use]
    pub fn list_active(&self) -> Vec<EphemeralSpace> {
        self.spaces.list()
    }

    #[must_use]
    pub fn get_info(&self, id: Uuid) -> Option<EphemeralSpace> {
        self.spaces.get(id)
    }

    #[instrument(skip_all, fields(pid = ?pid, test_mode = self.config.test_mode))]
    pub async fn create_space(&self, pid: Option<i32>, app_path: Option<PathBuf>) -> Result<EphemeralSpace, PrivarionError> {
        if self.spaces.is_at_capacity() {
            return Err(PrivarionError::MaxSpacesExceeded {
                max: self.config.max_ephemeral_spaces,
            });
        }

        let id = Uuid::new_v4();
        let mut space = EphemeralSpace::new(id, &self.config.base_path, pid, app_path);

        let create_start = Instant::now();
        if self.config.test_mode {
            tokio::time::sleep(Duration::from_millis(5)).await;
        } else {
            self.snapshot_backend.create(&space.snapshot_name).await?;
        }
        warn_if_over_budget("snapshot create", create_start.elapsed(), SNAPSHOT_CREATE_BUDGET);
        space.state = SpaceState::Mounted;

        let mount_start = Instant::now();
        let mount_result = if self.config.test_mode {
            tokio::time::sleep(Duration::from_millis(2)).await;
            tokio::fs::create_dir_all(&space.mount_path).await.map_err(PrivarionError::from)
        } else {
            tokio::fs::create_dir_all(&space.mount_path).await?;
            self.snapshot_backend.mount(&space.snapshot_name, &space.mount_path).await
        };

        if let Err(e) = mount_result {
            warn!(error = %e, "mount failed after snapshot creation, rolling back");
            if !self.config.test_mode {
                let _ = self.snapshot_backend.delete(&space.snapshot_name).await;
            }
            let _ = tokio::fs::remove_dir_all(&space.mount_path).await;
            return Err(e);
        }
        warn_if_over_budget("mount", mount_start.elapsed(), MOUNT_BUDGET);

        space.state = SpaceState::Active;
        self.spaces.register(space.clone(), None)?;
        info!(space_id = %space.id, "ephemeral space created");
        Ok(space)
    }

    #[instrument(skip_all, fields(space_id = %id))]
    pub async fn destroy_space(&self, id: Uuid) -> Result<(), PrivarionError> {
        let Some(space) = self.spaces.get(id) else {
            info!("space already destroyed, treating as success");
            return Ok(());
        };

        let mut first_error = None;

        if !self.config.test_mode {
            if let Err(e) = self.snapshot_backend.unmount(&space.mount_path).await {
                warn!(error = %e, "unmount failed");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&space.mount_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove mount directory");
                first_error.get_or_insert(PrivarionError::from(e));
            }
        }

        if !self.config.test_mode {
            let delete_start = Instant::now();
            if let Err(e) = self.snapshot_backend.delete(&space.snapshot_name).await {
                warn!(error = %e, "snapshot delete failed");
                first_error.get_or_insert(e);
            }
            warn_if_over_budget("snapshot delete", delete_start.elapsed(), SNAPSHOT_DELETE_BUDGET);
        }

        self.spaces.unregister(id);
        self.baselines.lock().await.remove(&id);
        info!("ephemeral space destroyed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fans out `destroy_space` across every active space concurrently,
    /// logging (not propagating) individual failures.
    pub async fn cleanup_all(&self) {
        let ids: Vec<Uuid> = self.spaces.list().into_iter().map(|s| s.id).collect();
        let futures = ids.into_iter().map(|id| async move {
            if let Err(e) = self.destroy_space(id).await {
                warn!(space_id = %id, error = %e, "cleanup_all: destroy_space failed");
            }
        });
        futures::future::join_all(futures).await;
    }

    async fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        if self.config.test_mode {
            return Vec::new();
        }
        let root_str = root.to_string_lossy().into_owned();
        match self.executor.exec("find", &[root_str, "-type".into(), "f".into()]).await {
            Ok(out) if out.is_success() => out.stdout.lines().map(PathBuf::from).collect(),
            Ok(out) => {
                warn!(exit_code = out.exit_code, "find exited non-zero while listing files");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "failed to list files via host tooling");
                Vec::new()
            }
        }
    }

    fn diff(baseline: &[PathBuf], current: &[PathBuf]) -> Vec<PathBuf> {
        current.iter().filter(|f| !baseline.contains(f)).cloned().collect()
    }

    pub async fn create_pre_execution(&self, app_path: PathBuf, pid: Option<i32>) -> Result<SnapshotMetadata, PrivarionError> {
        if !self.config.test_mode {
            let name = format!("privarion-pre-{}", Uuid::new_v4());
            self.snapshot_backend.create(&name).await?;
        }
        let files = self.list_files(&app_path).await;
        let mut metadata = SnapshotMetadata::new(SnapshotStrategy::PreExecution, Some(app_path.clone()), pid);
        metadata.total_files = files.len() as u32;
        let id = metadata.id;
        self.snapshots.insert(metadata.clone());
        self.baselines.lock().await.insert(
            id,
            Baseline {
                root: app_path,
                files,
            },
        );
        Ok(metadata)
    }

    pub async fn restore_from_pre_execution(&self, id: Uuid, kill_process: bool) -> Result<(), PrivarionError> {
        let metadata = self
            .snapshots
            .get(id)
            .ok_or_else(|| PrivarionError::SnapshotNotFound(id.to_string()))?;

        if kill_process {
            if let Some(pid) = metadata.pid {
                if let Err(e) = self.executor.exec_privileged("kill", &["-9".into(), pid.to_string()]).await {
                    warn!(error = %e, pid, "failed to signal process before restore");
                }
            }
        }

        if !self.config.test_mode {
            self.snapshot_backend.restore(&metadata.snapshot_name).await?;
        }
        self.snapshots.remove(id);
        self.baselines.lock().await.remove(&id);
        Ok(())
    }

    pub async fn create_post_execution(&self, pre_id: Uuid, app_path: PathBuf, pid: Option<i32>) -> Result<SnapshotMetadata, PrivarionError> {
        let baseline_files: Vec<PathBuf> = {
            let baselines = self.baselines.lock().await;
            baselines
                .get(&pre_id)
                .map(|b| b.files.clone())
                .ok_or_else(|| PrivarionError::SnapshotNotFound(pre_id.to_string()))?
        };

        let current = self.list_files(&app_path).await;
        let changed = Self::diff(&baseline_files, &current);

        let mut metadata = SnapshotMetadata::new(SnapshotStrategy::PostExecution, Some(app_path), pid);
        metadata.parent = Some(pre_id);
        metadata.total_files = current.len() as u32;
        metadata.changed_files = changed;
        self.snapshots.insert(metadata.clone());
        Ok(metadata)
    }

    pub async fn create_incremental(&self, target_path: Option<PathBuf>, app_path: Option<PathBuf>) -> Result<SnapshotMetadata, PrivarionError> {
        let parent = self.snapshots.last_incremental();
        let root = target_path.clone().or_else(|| app_path.clone()).unwrap_or_default();

        let baseline_files = if let Some(parent_id) = parent {
            self.baselines.lock().await.get(&parent_id).map(|b| b.files.clone()).unwrap_or_default()
        } else {
            Vec::new()
        };

        let current = self.list_files(&root).await;
        let changed = Self::diff(&baseline_files, &current);

        if !self.config.test_mode {
            let name = format!("privarion-incr-{}", Uuid::new_v4());
            self.snapshot_backend.create(&name).await?;
        }

        let mut metadata = SnapshotMetadata::new(SnapshotStrategy::Incremental, app_path, None);
        metadata.parent = parent;
        metadata.total_files = current.len() as u32;
        metadata.changed_files = changed;
        let id = metadata.id;
        self.snapshots.insert(metadata.clone());
        self.baselines.lock().await.insert(id, Baseline { root, files: current });
        self.snapshots.set_last_incremental(id);
        Ok(metadata)
    }

    /// Starts a periodic background task that captures a
    /// [`SnapshotStrategy::Scheduled`] snapshot every `schedule.interval`,
    /// enforcing `max_snapshots` and `retention_days` after each capture.
    pub fn start_scheduled(self: &Arc<Self>, mut schedule: SnapshotSchedule, target_path: Option<PathBuf>, app_path: Option<PathBuf>) -> Uuid {
        schedule.target_path = target_path;
        schedule.app_path = app_path;
        let schedule_id = schedule.id;
        let interval = schedule.interval;
        let max_snapshots = schedule.max_snapshots;
        let retention_days = schedule.retention_days;
        let manager = Arc::clone(self);

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip to align with "periodic" semantics
            loop {
                ticker.tick().await;
                let root = manager
                    .snapshots
                    .active_schedule()
                    .and_then(|s| s.target_path.or(s.app_path))
                    .unwrap_or_default();
                let current = manager.list_files(&root).await;

                if !manager.config.test_mode {
                    let name = format!("privarion-sched-{}", Uuid::new_v4());
                    if let Err(e) = manager.snapshot_backend.create(&name).await {
                        warn!(error = %e, "scheduled snapshot capture failed");
                        continue;
                    }
                }

                let mut metadata = SnapshotMetadata::new(SnapshotStrategy::Scheduled, None, None);
                metadata.total_files = current.len() as u32;
                manager.snapshots.insert(metadata);

                for evicted in manager.snapshots.enforce_max_scheduled(max_snapshots) {
                    if !manager.config.test_mode {
                        let _ = manager.snapshot_backend.delete(&evicted.snapshot_name).await;
                    }
                }
                for swept in manager.snapshots.cleanup_old_snapshots(retention_days) {
                    if !manager.config.test_mode {
                        let _ = manager.snapshot_backend.delete(&swept.snapshot_name).await;
                    }
                }
            }
        });

        self.snapshots.set_active_schedule(schedule, join_handle.abort_handle());
        schedule_id
    }

    pub fn stop_scheduled(&self) {
        self.snapshots.clear_active_schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::{InMemorySnapshotBackend, RecordingCommandExecutor};

    fn manager(test_mode: bool) -> (tempfile::TempDir, EphemeralFileSystemManager) {
        let dir = tempfile::tempdir().unwrap();
        let config = EphemeralFileSystemManagerConfig {
            base_path: dir.path().to_path_buf(),
            max_ephemeral_spaces: 2,
            test_mode,
        };
        let mgr = EphemeralFileSystemManager::new(
            config,
            Arc::new(InMemorySnapshotBackend::new()),
            Arc::new(RecordingCommandExecutor::new()),
        );
        (dir, mgr)
    }

    #[tokio::test]
    async fn create_and_destroy_space_round_trip() {
        let (_dir, mgr) = manager(true);
        let space = mgr.create_space(Some(123), None).await.unwrap();
        assert_eq!(space.state, SpaceState::Active);
        assert_eq!(mgr.list_active().len(), 1);
        mgr.destroy_space(space.id).await.unwrap();
        assert_eq!(mgr.list_active().len(), 0);
    }

    #[tokio::test]
    async fn destroy_missing_space_is_idempotent() {
        let (_dir, mgr) = manager(true);
        mgr.destroy_space(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn create_space_respects_capacity() {
        let (_dir, mgr) = manager(true);
        mgr.create_space(None, None).await.unwrap();
        mgr.create_space(None, None).await.unwrap();
        let err = mgr.create_space(None, None).await.unwrap_err();
        assert!(matches!(err, PrivarionError::MaxSpacesExceeded { max: 2 }));
    }

    #[tokio::test]
    async fn cleanup_all_destroys_every_space() {
        let (_dir, mgr) = manager(true);
        mgr.create_space(None, None).await.unwrap();
        mgr.create_space(None, None).await.unwrap();
        mgr.cleanup_all().await;
        assert_eq!(mgr.list_active().len(), 0);
    }

    #[tokio::test]
    async fn pre_and_post_execution_snapshot_diff() {
        let (_dir, mgr) = manager(true);
        let pre = mgr.create_pre_execution(PathBuf::from("/app"), Some(1)).await.unwrap();
        let post = mgr.create_post_execution(pre.id, PathBuf::from("/app"), Some(1)).await.unwrap();
        assert_eq!(post.parent, Some(pre.id));
    }

    #[tokio::test]
    async fn restore_from_pre_execution_removes_metadata() {
        let (_dir, mgr) = manager(true);
        let pre = mgr.create_pre_execution(PathBuf::from("/app"), None).await.unwrap();
        mgr.restore_from_pre_execution(pre.id, false).await.unwrap();
        assert!(mgr.snapshots.get(pre.id).is_none());
    }

    #[tokio::test]
    async fn create_post_execution_unknown_pre_id_fails() {
        let (_dir, mgr) = manager(true);
        let err = mgr.create_post_execution(Uuid::new_v4(), PathBuf::from("/app"), None).await.unwrap_err();
        assert!(matches!(err, PrivarionError::SnapshotNotFound(_)));
    }

    #[tokio::test]
    async fn incremental_chains_to_previous_parent() {
        let (_dir, mgr) = manager(true);
        let first = mgr.create_incremental(Some(PathBuf::from("/data")), None).await.unwrap();
        assert!(first.parent.is_none());
        let second = mgr.create_incremental(Some(PathBuf::from("/data")), None).await.unwrap();
        assert_eq!(second.parent, Some(first.id));
    }
}
