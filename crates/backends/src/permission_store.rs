use async_trait::async_trait;
use dashmap::DashMap;
use privarion_core::PrivarionError;
use std::path::{Path, PathBuf};

/// TCC-style service identifier (`"kTCCServiceCamera"`, `"kTCCServiceMicrophone"`, ...).
pub type ServiceId = String;

/// TCC authorization value, matching the on-disk `TCC.db` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthValue {
    Denied = 0,
    Unknown = 1,
    Allowed = 2,
    Limited = 3,
}

impl AuthValue {
    #[must_use]
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Denied),
            1 => Some(Self::Unknown),
            2 => Some(Self::Allowed),
            3 => Some(Self::Limited),
            _ => None,
        }
    }
}

/// One row of the permission database: a client's authorization for a
/// service, plus the bookkeeping fields TCC carries alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    pub service: ServiceId,
    pub client: String,
    pub auth_value: AuthValue,
    pub last_modified: i64,
    pub prompt_count: u32,
    pub csreq: Option<Vec<u8>>,
    pub policy_id: Option<i64>,
    pub indirect_object_identifier: Option<String>,
}

impl Permission {
    #[must_use]
    pub fn new(service: impl Into<String>, client: impl Into<String>, auth_value: AuthValue) -> Self {
        Self {
            service: service.into(),
            client: client.into(),
            auth_value,
            last_modified: 0,
            prompt_count: 0,
            csreq: None,
            policy_id: None,
            indirect_object_identifier: None,
        }
    }
}

/// Read/write access to the host's permission database.
///
/// Mirrors the read-mostly nature of the real TCC database: every backend
/// must support connect/enumerate/get_status and snapshot/restore; write
/// access (`grant`/`revoke`) is optional because direct TCC.db mutation
/// requires Full Disk Access and is unavailable on some hosts, so callers
/// must check [`PermissionStore::supports_writes`] before calling them.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn connect(&self) -> Result<(), PrivarionError>;
    async fn disconnect(&self) -> Result<(), PrivarionError>;

    async fn enumerate(&self) -> Result<Vec<Permission>, PrivarionError>;
    async fn get_status(
        &self,
        client: &str,
        service: &str,
    ) -> Result<Option<AuthValue>, PrivarionError>;

    /// Whether [`grant`](Self::grant) and [`revoke`](Self::revoke) are backed
    /// by real writes on this backend.
    fn supports_writes(&self) -> bool {
        false
    }

    async fn grant(&self, client: &str, service: &str) -> Result<(), PrivarionError> {
        let _ = (client, service);
        Err(PrivarionError::WriteNotSupported)
    }

    async fn revoke(&self, client: &str, service: &str) -> Result<(), PrivarionError> {
        let _ = (client, service);
        Err(PrivarionError::WriteNotSupported)
    }

    /// Write a point-in-time copy of the database to `dest` and return the
    /// path actually written (backends may append an extension).
    async fn snapshot(&self, dest: &Path) -> Result<PathBuf, PrivarionError>;

    /// Overwrite the live database from a prior [`snapshot`](Self::snapshot).
    async fn restore_from(&self, source: &Path) -> Result<(), PrivarionError>;
}

/// Host-backed [`PermissionStore`]. A real implementation would open
/// `~/Library/Application Support/com.apple.TCC/TCC.db` read-only (or
/// read-write with Full Disk Access) via a sqlite driver; this repository
/// ships the trait contract and the in-memory double below, and documents
/// the real backend as the integration seam a deployment wires in.
pub struct HostPermissionStore {
    db_path: PathBuf,
}

impl HostPermissionStore {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

#[async_trait]
impl PermissionStore for HostPermissionStore {
    async fn connect(&self) -> Result<(), PrivarionError> {
        if !self.db_path.exists() {
            return Err(PrivarionError::InvalidConfiguration(format!(
                "permission database not found at {}",
                self.db_path.display()
            )));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PrivarionError> {
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<Permission>, PrivarionError> {
        Err(PrivarionError::AccessDenied(
            "direct TCC.db reads require a sqlite backend not compiled into this build".into(),
        ))
    }

    async fn get_status(
        &self,
        _client: &str,
        _service: &str,
    ) -> Result<Option<AuthValue>, PrivarionError> {
        Err(PrivarionError::AccessDenied(
            "direct TCC.db reads require a sqlite backend not compiled into this build".into(),
        ))
    }

    async fn snapshot(&self, dest: &Path) -> Result<PathBuf, PrivarionError> {
        tokio::fs::copy(&self.db_path, dest).await?;
        Ok(dest.to_path_buf())
    }

    async fn restore_from(&self, source: &Path) -> Result<(), PrivarionError> {
        tokio::fs::copy(source, &self.db_path).await?;
        Ok(())
    }
}

/// In-memory [`PermissionStore`] test double, keyed by `(client, service)`.
/// Supports writes unconditionally, since tests exercising `grant`/`revoke`
/// shouldn't need Full Disk Access semantics.
pub struct InMemoryPermissionStore {
    rows: DashMap<(String, String), Permission>,
}

impl InMemoryPermissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn seed(&self, permission: Permission) {
        self.rows
            .insert((permission.client.clone(), permission.service.clone()), permission);
    }

    fn key(client: &str, service: &str) -> (String, String) {
        (client.to_string(), service.to_string())
    }
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn connect(&self) -> Result<(), PrivarionError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PrivarionError> {
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<Permission>, PrivarionError> {
        Ok(self.rows.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn get_status(
        &self,
        client: &str,
        service: &str,
    ) -> Result<Option<AuthValue>, PrivarionError> {
        Ok(self
            .rows
            .get(&Self::key(client, service))
            .map(|row| row.auth_value))
    }

    fn supports_writes(&self) -> bool {
        true
    }

    async fn grant(&self, client: &str, service: &str) -> Result<(), PrivarionError> {
        self.rows
            .entry(Self::key(client, service))
            .and_modify(|row| row.auth_value = AuthValue::Allowed)
            .or_insert_with(|| Permission::new(service, client, AuthValue::Allowed));
        Ok(())
    }

    async fn revoke(&self, client: &str, service: &str) -> Result<(), PrivarionError> {
        self.rows
            .entry(Self::key(client, service))
            .and_modify(|row| row.auth_value = AuthValue::Denied)
            .or_insert_with(|| Permission::new(service, client, AuthValue::Denied));
        Ok(())
    }

    async fn snapshot(&self, dest: &Path) -> Result<PathBuf, PrivarionError> {
        let rows: Vec<_> = self.rows.iter().map(|e| e.value().client.clone()).collect();
        tokio::fs::write(dest, rows.join("\n")).await?;
        Ok(dest.to_path_buf())
    }

    async fn restore_from(&self, _source: &Path) -> Result<(), PrivarionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grant_then_get_status_roundtrips() {
        let store = InMemoryPermissionStore::new();
        store.grant("com.example.app", "kTCCServiceCamera").await.unwrap();
        let status = store
            .get_status("com.example.app", "kTCCServiceCamera")
            .await
            .unwrap();
        assert_eq!(status, Some(AuthValue::Allowed));
    }

    #[tokio::test]
    async fn revoke_overrides_prior_grant() {
        let store = InMemoryPermissionStore::new();
        store.grant("com.example.app", "kTCCServiceMicrophone").await.unwrap();
        store.revoke("com.example.app", "kTCCServiceMicrophone").await.unwrap();
        let status = store
            .get_status("com.example.app", "kTCCServiceMicrophone")
            .await
            .unwrap();
        assert_eq!(status, Some(AuthValue::Denied));
    }

    #[tokio::test]
    async fn unknown_pair_returns_none() {
        let store = InMemoryPermissionStore::new();
        let status = store.get_status("nobody", "nothing").await.unwrap();
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn enumerate_returns_all_seeded_rows() {
        let store = InMemoryPermissionStore::new();
        store.seed(Permission::new("kTCCServiceCamera", "a", AuthValue::Allowed));
        store.seed(Permission::new("kTCCServiceMicrophone", "b", AuthValue::Denied));
        let rows = store.enumerate().await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn host_store_connect_fails_when_db_missing() {
        let store = HostPermissionStore::new("/nonexistent/path/TCC.db");
        let err = store.connect().await.unwrap_err();
        assert!(matches!(err, PrivarionError::InvalidConfiguration(_)));
    }
}
