use async_trait::async_trait;
use dashmap::DashSet;
use privarion_core::PrivarionError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::CommandExecutor;

/// Creates, deletes, mounts, unmounts, and restores named copy-on-write
/// snapshots on a host volume.
///
/// Implementations must return exit-code-accurate results and surface
/// stderr in the error message, since callers (the ephemeral filesystem
/// manager) rely on the distinction between "command ran and failed" and
/// "command could not run" only for logging, not control flow — both are
/// reported as the same error variant by the caller.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn create(&self, name: &str) -> Result<(), PrivarionError>;
    async fn delete(&self, name: &str) -> Result<(), PrivarionError>;
    async fn mount(&self, name: &str, mount_path: &Path) -> Result<(), PrivarionError>;
    async fn unmount(&self, mount_path: &Path) -> Result<(), PrivarionError>;
    async fn restore(&self, name: &str) -> Result<(), PrivarionError>;
}

/// Drives the real host snapshot/mount utilities through a
/// [`CommandExecutor`]:
///
/// - `create`  → `tmutil localsnapshot`
/// - `delete`  → `diskutil apfs deleteSnapshot / -name <name>`
/// - `mount`   → `mount_apfs -s <name> / <mount>`
/// - `unmount` → `umount <mount>`
/// - `restore` → `diskutil apfs restore <name> / -force`
pub struct HostSnapshotBackend {
    executor: Arc<dyn CommandExecutor>,
    volume: String,
}

impl HostSnapshotBackend {
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            volume: "/".to_string(),
        }
    }

    #[must_use]
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume = volume.into();
        self
    }

    fn fail_if_nonzero(op: &str, out: crate::command::CommandOutput) -> Result<(), PrivarionError> {
        if out.is_success() {
            Ok(())
        } else {
            Err(PrivarionError::SnapshotCreationFailed(format!(
                "{op} exited {}: {}",
                out.exit_code, out.stderr
            )))
        }
    }
}

#[async_trait]
impl SnapshotBackend for HostSnapshotBackend {
    async fn create(&self, _name: &str) -> Result<(), PrivarionError> {
        let out = self
            .executor
            .exec("tmutil", &["localsnapshot".to_string()])
            .await?;
        Self::fail_if_nonzero("tmutil localsnapshot", out)
    }

    async fn delete(&self, name: &str) -> Result<(), PrivarionError> {
        let out = self
            .executor
            .exec_privileged(
                "diskutil",
                &[
                    "apfs".to_string(),
                    "deleteSnapshot".to_string(),
                    self.volume.clone(),
                    "-name".to_string(),
                    name.to_string(),
                ],
            )
            .await?;
        if out.is_success() {
            Ok(())
        } else {
            Err(PrivarionError::SnapshotDeletionFailed(format!(
                "diskutil apfs deleteSnapshot exited {}: {}",
                out.exit_code, out.stderr
            )))
        }
    }

    async fn mount(&self, name: &str, mount_path: &Path) -> Result<(), PrivarionError> {
        let out = self
            .executor
            .exec_privileged(
                "mount_apfs",
                &[
                    "-s".to_string(),
                    name.to_string(),
                    self.volume.clone(),
                    mount_path.to_string_lossy().into_owned(),
                ],
            )
            .await?;
        if out.is_success() {
            Ok(())
        } else {
            Err(PrivarionError::MountOperationFailed(format!(
                "mount_apfs exited {}: {}",
                out.exit_code, out.stderr
            )))
        }
    }

    async fn unmount(&self, mount_path: &Path) -> Result<(), PrivarionError> {
        let out = self
            .executor
            .exec_privileged(
                "umount",
                &[mount_path.to_string_lossy().into_owned()],
            )
            .await?;
        if out.is_success() {
            Ok(())
        } else {
            Err(PrivarionError::UnmountOperationFailed(format!(
                "umount exited {}: {}",
                out.exit_code, out.stderr
            )))
        }
    }

    async fn restore(&self, name: &str) -> Result<(), PrivarionError> {
        let out = self
            .executor
            .exec_privileged(
                "diskutil",
                &[
                    "apfs".to_string(),
                    "restore".to_string(),
                    name.to_string(),
                    self.volume.clone(),
                    "-force".to_string(),
                ],
            )
            .await?;
        if out.is_success() {
            Ok(())
        } else {
            Err(PrivarionError::RestoreFailed(format!(
                "diskutil apfs restore exited {}: {}",
                out.exit_code, out.stderr
            )))
        }
    }
}

/// Deterministic, host-free [`SnapshotBackend`] backing the manager's
/// documented test-mode bypass. Tracks which names/paths currently "exist"
/// so double-delete/double-unmount still surface errors the same way a real
/// backend would.
pub struct InMemorySnapshotBackend {
    snapshots: DashSet<String>,
    mounts: DashSet<PathBuf>,
    op_delay: std::time::Duration,
}

impl InMemorySnapshotBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: DashSet::new(),
            mounts: DashSet::new(),
            op_delay: std::time::Duration::from_millis(0),
        }
    }

    /// Inject a deterministic sleep into each operation, used to exercise
    /// the manager's "log but don't fail" slow-operation warnings.
    #[must_use]
    pub fn with_op_delay(mut self, delay: std::time::Duration) -> Self {
        self.op_delay = delay;
        self
    }
}

impl Default for InMemorySnapshotBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotBackend for InMemorySnapshotBackend {
    async fn create(&self, name: &str) -> Result<(), PrivarionError> {
        tokio::time::sleep(self.op_delay).await;
        if !self.snapshots.insert(name.to_string()) {
            return Err(PrivarionError::SnapshotCreationFailed(format!(
                "snapshot {name} already exists"
            )));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), PrivarionError> {
        tokio::time::sleep(self.op_delay).await;
        if !self.snapshots.remove(name).is_some() {
            return Err(PrivarionError::SnapshotDeletionFailed(format!(
                "snapshot {name} not found"
            )));
        }
        Ok(())
    }

    async fn mount(&self, name: &str, mount_path: &Path) -> Result<(), PrivarionError> {
        tokio::time::sleep(self.op_delay).await;
        if !self.snapshots.contains(name) {
            return Err(PrivarionError::MountOperationFailed(format!(
                "snapshot {name} does not exist"
            )));
        }
        self.mounts.insert(mount_path.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, mount_path: &Path) -> Result<(), PrivarionError> {
        tokio::time::sleep(self.op_delay).await;
        if !self.mounts.remove(mount_path).is_some() {
            return Err(PrivarionError::UnmountOperationFailed(format!(
                "{} is not mounted",
                mount_path.display()
            )));
        }
        Ok(())
    }

    async fn restore(&self, name: &str) -> Result<(), PrivarionError> {
        tokio::time::sleep(self.op_delay).await;
        if !self.snapshots.contains(name) {
            return Err(PrivarionError::RestoreFailed(format!(
                "snapshot {name} does not exist"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_backend_lifecycle() {
        let backend = InMemorySnapshotBackend::new();
        backend.create("snap-1").await.unwrap();
        backend.mount("snap-1", Path::new("/tmp/mnt-1")).await.unwrap();
        backend.unmount(Path::new("/tmp/mnt-1")).await.unwrap();
        backend.delete("snap-1").await.unwrap();
    }

    #[tokio::test]
    async fn double_create_fails() {
        let backend = InMemorySnapshotBackend::new();
        backend.create("snap-1").await.unwrap();
        let err = backend.create("snap-1").await.unwrap_err();
        assert!(matches!(err, PrivarionError::SnapshotCreationFailed(_)));
    }

    #[tokio::test]
    async fn mount_unknown_snapshot_fails() {
        let backend = InMemorySnapshotBackend::new();
        let err = backend.mount("ghost", Path::new("/tmp/mnt")).await.unwrap_err();
        assert!(matches!(err, PrivarionError::MountOperationFailed(_)));
    }

    #[tokio::test]
    async fn unmount_unknown_path_fails() {
        let backend = InMemorySnapshotBackend::new();
        let err = backend.unmount(Path::new("/tmp/never")).await.unwrap_err();
        assert!(matches!(err, PrivarionError::UnmountOperationFailed(_)));
    }

    #[tokio::test]
    async fn host_backend_surfaces_nonzero_exit() {
        use crate::command::{CommandOutput, RecordingCommandExecutor};

        let exec = Arc::new(RecordingCommandExecutor::new());
        exec.script(
            "tmutil",
            &["localsnapshot"],
            CommandOutput {
                stdout: String::new(),
                stderr: "permission denied".into(),
                exit_code: 1,
            },
        );
        let backend = HostSnapshotBackend::new(exec);
        let err = backend.create("ignored").await.unwrap_err();
        assert!(matches!(err, PrivarionError::SnapshotCreationFailed(_)));
        assert!(err.to_string().contains("permission denied"));
    }
}
