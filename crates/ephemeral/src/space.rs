use std::path::PathBuf;
use std::time::Instant;

use uuid::Uuid;

/// Lifecycle of an [`EphemeralSpace`]. Only `Active` exposes `mount_path` to
/// callers outside the manager; the others gate it behind `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceState {
    Created,
    Mounted,
    Active,
    Unmounted,
    Deleted,
}

/// A single ephemeral, snapshot-backed sandbox.
///
/// `created_at` is a monotonic [`Instant`] rather than a wall-clock
/// timestamp: spaces never outlive a single process's uptime, so there is
/// nothing to persist or compare across restarts.
#[derive(Debug, Clone)]
pub struct EphemeralSpace {
    pub id: Uuid,
    pub snapshot_name: String,
    pub mount_path: PathBuf,
    pub created_at: Instant,
    pub owning_pid: Option<i32>,
    pub app_path: Option<PathBuf>,
    pub state: SpaceState,
}

impl EphemeralSpace {
    #[must_use]
    pub fn new(
        id: Uuid,
        base_path: &std::path::Path,
        owning_pid: Option<i32>,
        app_path: Option<PathBuf>,
    ) -> Self {
        Self {
            snapshot_name: format!("privarion-{id}"),
            mount_path: base_path.join(id.to_string()),
            created_at: Instant::now(),
            owning_pid,
            app_path,
            id,
            state: SpaceState::Created,
        }
    }

    /// `mount_path` is only meaningful to callers once the space is `Active`.
    #[must_use]
    pub fn active_mount_path(&self) -> Option<&std::path::Path> {
        matches!(self.state, SpaceState::Active).then_some(self.mount_path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_path_hidden_outside_active_state() {
        let mut space = EphemeralSpace::new(Uuid::new_v4(), std::path::Path::new("/tmp/privarion"), None, None);
        assert!(space.active_mount_path().is_none());
        space.state = SpaceState::Active;
        assert!(space.active_mount_path().is_some());
    }

    #[test]
    fn snapshot_name_and_mount_path_derive_from_id() {
        let id = Uuid::new_v4();
        let space = EphemeralSpace::new(id, std::path::Path::new("/tmp/privarion"), None, None);
        assert_eq!(space.snapshot_name, format!("privarion-{id}"));
        assert_eq!(space.mount_path, std::path::Path::new("/tmp/privarion").join(id.to_string()));
    }
}
