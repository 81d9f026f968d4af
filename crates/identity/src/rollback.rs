use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use privarion_backends::CommandExecutor;
use privarion_core::{IdentityType, PrivarionError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A persisted record of captured original identity values, sufficient to
/// reverse a spoofing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub types: HashSet<IdentityType>,
    pub original_values: HashMap<IdentityType, String>,
    pub metadata: HashMap<String, String>,
}

impl RollbackPoint {
    fn validate(&self) -> Result<(), PrivarionError> {
        if self.id.is_empty() {
            return Err(PrivarionError::InvalidRollbackPoint("id is empty".into()));
        }
        if self.original_values.is_empty() {
            return Err(PrivarionError::InvalidRollbackPoint(format!(
                "rollback point {} has no captured values",
                self.id
            )));
        }
        Ok(())
    }
}

/// Captures, persists, and restores original identity values.
///
/// Backed by a directory of per-point JSON files, owner-only (`0700` dir,
/// `0600` files). The in-memory map is the single source of truth for reads;
/// the directory exists for durability across restarts.
pub struct RollbackManager {
    dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    points: RwLock<HashMap<String, RollbackPoint>>,
}

impl RollbackManager {
    /// Load all existing rollback points from `dir` into memory.
    pub async fn new(dir: PathBuf, executor: Arc<dyn CommandExecutor>) -> Result<Self, PrivarionError> {
        tokio::fs::create_dir_all(&dir).await?;
        Self::set_dir_permissions(&dir).await?;

        let mut points = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<RollbackPoint>(&raw) {
                Ok(point) => {
                    points.insert(point.id.clone(), point);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupted rollback point file"),
            }
        }

        Ok(Self {
            dir,
            executor,
            points: RwLock::new(points),
        })
    }

    async fn set_dir_permissions(dir: &Path) -> Result<(), PrivarionError> {
        let mut perms = tokio::fs::metadata(dir).await?.permissions();
        perms.set_mode(0o700);
        tokio::fs::set_permissions(dir, perms).await?;
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Capture current values for every requested type, persist a new point,
    /// and return its id. Capture failure for any type is fatal.
    pub async fn create_rollback_point(
        &self,
        types: &[IdentityType],
    ) -> Result<String, PrivarionError> {
        let mut original_values = HashMap::new();
        for &ty in types {
            let value = self.capture_value(ty).await?;
            original_values.insert(ty, value);
        }

        let point = RollbackPoint {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            types: types.iter().copied().collect(),
            original_values,
            metadata: HashMap::new(),
        };
        point.validate()?;

        self.persist(&point).await?;
        let id = point.id.clone();
        self.points.write().insert(id.clone(), point);
        Ok(id)
    }

    async fn persist(&self, point: &RollbackPoint) -> Result<(), PrivarionError> {
        let path = self.path_for(&point.id);
        let json = serde_json::to_string_pretty(point)?;
        tokio::fs::write(&path, json).await?;
        let mut perms = tokio::fs::metadata(&path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(&path, perms).await?;
        Ok(())
    }

    async fn capture_value(&self, ty: IdentityType) -> Result<String, PrivarionError> {
        match ty {
            IdentityType::Hostname => {
                let out = self.executor.exec("hostname", &[]).await?;
                Ok(out.stdout.trim().to_string())
            }
            IdentityType::UserId => {
                let out = self.executor.exec("id", &["-u".to_string()]).await?;
                Ok(out.stdout.trim().to_string())
            }
            IdentityType::GroupId => {
                let out = self.executor.exec("id", &["-g".to_string()]).await?;
                Ok(out.stdout.trim().to_string())
            }
            _ => Ok(format!("unknown:{}", ty.as_str())),
        }
    }

    /// Restore each value recorded by `id`. Types whose restore path is
    /// unsupported are logged and skipped rather than failing the call.
    pub async fn perform_rollback(&self, id: &str) -> Result<(), PrivarionError> {
        let point = self
            .points
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PrivarionError::RollbackPointNotFound(id.to_string()))?;
        point.validate()?;

        for (ty, value) in &point.original_values {
            self.restore_one(*ty, value).await;
        }
        Ok(())
    }

    /// Restore only the intersection of `types` (or all types if `None`)
    /// present in the most recent point whose `types` cover the request.
    pub async fn restore_original_values(
        &self,
        types: Option<&[IdentityType]>,
    ) -> Result<(), PrivarionError> {
        let requested: HashSet<IdentityType> = match types {
            Some(t) => t.iter().copied().collect(),
            None => IdentityType::ALL.iter().copied().collect(),
        };

        let candidate = {
            let points = self.points.read();
            points
                .values()
                .filter(|p| requested.is_subset(&p.types))
                .max_by_key(|p| p.timestamp)
                .cloned()
        };

        let Some(point) = candidate else {
            return Err(PrivarionError::RollbackPointNotFound(
                "no rollback point covers the requested types".into(),
            ));
        };

        for ty in requested {
            if let Some(value) = point.original_values.get(&ty) {
                self.restore_one(ty, value).await;
            }
        }
        Ok(())
    }

    async fn restore_one(&self, ty: IdentityType, value: &str) {
        match ty {
            IdentityType::Hostname => {
                if let Err(e) = self
                    .executor
                    .exec_privileged("scutil", &["--set".to_string(), "HostName".to_string(), value.to_string()])
                    .await
                {
                    warn!(identity_type = %ty, error = %e, "failed to restore identity value");
                }
            }
            IdentityType::UserId | IdentityType::GroupId => {
                warn!(identity_type = %ty, "restore path not supported on this platform, skipping");
            }
            _ => {
                warn!(identity_type = %ty, "restore path not supported for this identity type, skipping");
            }
        }
    }

    /// Delete rollback points (and their files) older than `older_than_days`.
    pub async fn cleanup(&self, older_than_days: i64) -> Result<usize, PrivarionError> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let expired: Vec<String> = self
            .points
            .read()
            .values()
            .filter(|p| p.timestamp < cutoff)
            .map(|p| p.id.clone())
            .collect();

        for id in &expired {
            let path = self.path_for(id);
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }

        let mut points = self.points.write();
        for id in &expired {
            points.remove(id);
        }
        Ok(expired.len())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<RollbackPoint> {
        self.points.read().get(id).cloned()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.points.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::RecordingCommandExecutor;

    async fn manager() -> (RollbackManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingCommandExecutor::new());
        let manager = RollbackManager::new(dir.path().to_path_buf(), executor)
            .await
            .unwrap();
        (manager, dir)
    }

    #[tokio::test]
    async fn create_and_persist_rollback_point() {
        let (manager, dir) = manager().await;
        let id = manager
            .create_rollback_point(&[IdentityType::Hostname])
            .await
            .unwrap();
        assert_eq!(manager.count(), 1);
        let path = dir.path().join(format!("{id}.json"));
        assert!(path.exists());
        let perms = std::fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn loads_existing_points_on_init() {
        let dir = tempfile::tempdir().unwrap();
        let executor: Arc<dyn CommandExecutor> = Arc::new(RecordingCommandExecutor::new());
        let first = RollbackManager::new(dir.path().to_path_buf(), executor.clone())
            .await
            .unwrap();
        let id = first
            .create_rollback_point(&[IdentityType::Hostname])
            .await
            .unwrap();

        let reloaded = RollbackManager::new(dir.path().to_path_buf(), executor)
            .await
            .unwrap();
        assert!(reloaded.get(&id).is_some());
    }

    #[tokio::test]
    async fn restore_original_values_picks_most_recent_covering_point() {
        let (manager, _dir) = manager().await;
        manager
            .create_rollback_point(&[IdentityType::Hostname])
            .await
            .unwrap();
        manager
            .restore_original_values(Some(&[IdentityType::Hostname]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restore_original_values_fails_when_no_point_covers_request() {
        let (manager, _dir) = manager().await;
        let result = manager
            .restore_original_values(Some(&[IdentityType::MacAddress]))
            .await;
        assert!(matches!(result, Err(PrivarionError::RollbackPointNotFound(_))));
    }

    #[tokio::test]
    async fn perform_rollback_unknown_id_fails() {
        let (manager, _dir) = manager().await;
        let result = manager.perform_rollback("missing").await;
        assert!(matches!(result, Err(PrivarionError::RollbackPointNotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_removes_points_older_than_retention() {
        let (manager, _dir) = manager().await;
        let id = manager
            .create_rollback_point(&[IdentityType::Hostname])
            .await
            .unwrap();
        manager.points.write().get_mut(&id).unwrap().timestamp =
            Utc::now() - chrono::Duration::days(60);

        let removed = manager.cleanup(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(manager.count(), 0);
    }
}
