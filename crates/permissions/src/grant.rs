use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use privarion_core::PrivarionError;
use privarion_rules::TemporaryGrantIssuer;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::duration::parse_duration;

const MAX_CLEANUP_STATS: usize = 100;
const DEFAULT_MAX_CONCURRENT_GRANTS: usize = 100;
const DEFAULT_CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60);
const DEFAULT_NOTIFICATION_THRESHOLD_SECS: i64 = 300;

/// A single temporary permission grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryPermissionGrant {
    pub id: String,
    pub bundle_id: String,
    pub service: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub notification_sent: bool,
}

impl TemporaryPermissionGrant {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        self.expires_at - now
    }
}

/// Request to create a new [`TemporaryPermissionGrant`].
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub bundle_id: String,
    pub service: String,
    pub duration: StdDuration,
    pub reason: Option<String>,
}

/// Outcome of a [`TemporaryPermissionManager::grant`] call.
#[derive(Debug, Clone)]
pub enum GrantOutcome {
    Granted(TemporaryPermissionGrant),
    AlreadyExists(TemporaryPermissionGrant),
}

/// One cleanup pass's summary, retained for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStats {
    pub timestamp: DateTime<Utc>,
    pub removed_count: usize,
    pub notifications_sent: usize,
}

struct ManagerState {
    grants: HashMap<String, TemporaryPermissionGrant>,
    cleanup_stats: Vec<CleanupStats>,
}

/// Single-writer actor over temporary permission grants, backed by a JSON
/// file persisted atomically after every mutation.
pub struct TemporaryPermissionManager {
    store_path: PathBuf,
    max_concurrent_grants: usize,
    notification_threshold: ChronoDuration,
    state: Mutex<ManagerState>,
}

impl TemporaryPermissionManager {
    /// Load existing grants from `store_path` if present, else start empty.
    pub async fn new(store_path: PathBuf) -> Result<Self, PrivarionError> {
        let grants = Self::load(&store_path).await?;
        Ok(Self {
            store_path,
            max_concurrent_grants: DEFAULT_MAX_CONCURRENT_GRANTS,
            notification_threshold: ChronoDuration::seconds(DEFAULT_NOTIFICATION_THRESHOLD_SECS),
            state: Mutex::new(ManagerState {
                grants,
                cleanup_stats: Vec::new(),
            }),
        })
    }

    #[must_use]
    pub fn with_max_concurrent_grants(mut self, max: usize) -> Self {
        self.max_concurrent_grants = max;
        self
    }

    #[must_use]
    pub fn with_notification_threshold(mut self, threshold: ChronoDuration) -> Self {
        self.notification_threshold = threshold;
        self
    }

    async fn load(path: &Path) -> Result<HashMap<String, TemporaryPermissionGrant>, PrivarionError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(HashMap::new());
        }
        let raw = tokio::fs::read_to_string(path).await?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let grants: HashMap<String, TemporaryPermissionGrant> = serde_json::from_str(&raw)?;
        Ok(grants)
    }

    async fn persist(&self, grants: &HashMap<String, TemporaryPermissionGrant>) -> Result<(), PrivarionError> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(grants)?;
        let tmp_path = self.store_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.store_path).await?;
        Ok(())
    }

    /// Create a grant, enforcing the duration bound, de-duplication against
    /// an existing non-expired grant, and the concurrent-grant cap.
    pub async fn grant(&self, request: GrantRequest) -> Result<GrantOutcome, PrivarionError> {
        if request.bundle_id.is_empty() || request.service.is_empty() {
            return Err(PrivarionError::InvalidRequest(
                "bundle_id and service must not be empty".into(),
            ));
        }
        if request.duration.is_zero() || request.duration > StdDuration::from_secs(24 * 3600) {
            return Err(PrivarionError::InvalidRequest(
                "grant duration must be > 0 and <= 24h".into(),
            ));
        }

        let snapshot = {
            let mut state = self.state.lock().await;
            let now = Utc::now();

            if let Some(existing) = state
                .grants
                .values()
                .find(|g| g.bundle_id == request.bundle_id && g.service == request.service && !g.is_expired(now))
            {
                return Ok(GrantOutcome::AlreadyExists(existing.clone()));
            }

            if state.grants.len() >= self.max_concurrent_grants {
                return Err(PrivarionError::Denied("capacity".into()));
            }

            let grant = TemporaryPermissionGrant {
                id: Uuid::new_v4().to_string(),
                bundle_id: request.bundle_id,
                service: request.service,
                granted_at: now,
                expires_at: now + ChronoDuration::from_std(request.duration).expect("bounded duration"),
                reason: request.reason,
                notification_sent: false,
            };
            state.grants.insert(grant.id.clone(), grant.clone());
            let snapshot = state.grants.clone();
            drop(state);
            (GrantOutcome::Granted(grant), snapshot)
        };

        self.persist(&snapshot.1).await?;
        Ok(snapshot.0)
    }

    pub async fn revoke(&self, id: &str) -> Result<(), PrivarionError> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.grants.remove(id).is_none() {
                return Err(PrivarionError::GrantNotFound(id.to_string()));
            }
            state.grants.clone()
        };
        self.persist(&snapshot).await
    }

    pub async fn revoke_all(&self, bundle_id: &str) -> Result<usize, PrivarionError> {
        let (removed, snapshot) = {
            let mut state = self.state.lock().await;
            let before = state.grants.len();
            state.grants.retain(|_, g| g.bundle_id != bundle_id);
            (before - state.grants.len(), state.grants.clone())
        };
        if removed > 0 {
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }

    pub async fn get_active(&self) -> Vec<TemporaryPermissionGrant> {
        let now = Utc::now();
        self.state
            .lock()
            .await
            .grants
            .values()
            .filter(|g| !g.is_expired(now))
            .cloned()
            .collect()
    }

    pub async fn get_by_bundle(&self, bundle_id: &str) -> Vec<TemporaryPermissionGrant> {
        self.state
            .lock()
            .await
            .grants
            .values()
            .filter(|g| g.bundle_id == bundle_id)
            .cloned()
            .collect()
    }

    pub async fn has_active(&self, bundle_id: &str, service: &str) -> bool {
        let now = Utc::now();
        self.state
            .lock()
            .await
            .grants
            .values()
            .any(|g| g.bundle_id == bundle_id && g.service == service && !g.is_expired(now))
    }

    pub async fn get(&self, id: &str) -> Option<TemporaryPermissionGrant> {
        self.state.lock().await.grants.get(id).cloned()
    }

    pub async fn cleanup_stats(&self) -> Vec<CleanupStats> {
        self.state.lock().await.cleanup_stats.clone()
    }

    /// One cleanup pass: removes expired grants, marks near-expiry grants as
    /// notified, and records a [`CleanupStats`] entry.
    pub async fn sweep_once(&self) -> Result<CleanupStats, PrivarionError> {
        let (stats, snapshot, mutated) = {
            let mut state = self.state.lock().await;
            let now = Utc::now();

            let expired_ids: Vec<String> = state
                .grants
                .values()
                .filter(|g| g.is_expired(now))
                .map(|g| g.id.clone())
                .collect();
            for id in &expired_ids {
                state.grants.remove(id);
            }

            let mut notifications_sent = 0;
            for grant in state.grants.values_mut() {
                if !grant.notification_sent && grant.remaining(now) < self.notification_threshold {
                    grant.notification_sent = true;
                    notifications_sent += 1;
                    info!(
                        grant_id = %grant.id,
                        bundle_id = %grant.bundle_id,
                        service = %grant.service,
                        "temporary grant nearing expiration"
                    );
                }
            }

            let mutated = !expired_ids.is_empty() || notifications_sent > 0;
            let stats = CleanupStats {
                timestamp: now,
                removed_count: expired_ids.len(),
                notifications_sent,
            };
            state.cleanup_stats.push(stats.clone());
            if state.cleanup_stats.len() > MAX_CLEANUP_STATS {
                let overflow = state.cleanup_stats.len() - MAX_CLEANUP_STATS;
                state.cleanup_stats.drain(0..overflow);
            }

            (stats, state.grants.clone(), mutated)
        };

        if mutated {
            self.persist(&snapshot).await?;
        }
        Ok(stats)
    }

    /// Runs [`sweep_once`](Self::sweep_once) every `cleanup_interval`,
    /// forever. Intended to be composed into a central scheduler via
    /// `tokio::select!`.
    pub async fn run_periodic_cleanup(&self, cleanup_interval: Option<StdDuration>) -> ! {
        let mut ticker = tokio::time::interval(cleanup_interval.unwrap_or(DEFAULT_CLEANUP_INTERVAL));
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "temporary grant cleanup sweep failed");
            }
        }
    }
}

#[async_trait]
impl TemporaryGrantIssuer for TemporaryPermissionManager {
    async fn grant_temporary(
        &self,
        bundle_id: &str,
        service: &str,
        duration: ChronoDuration,
    ) -> Result<(), PrivarionError> {
        let std_duration = duration
            .to_std()
            .map_err(|_| PrivarionError::InvalidDuration(duration.to_string()))?;
        self.grant(GrantRequest {
            bundle_id: bundle_id.to_string(),
            service: service.to_string(),
            duration: std_duration,
            reason: None,
        })
        .await?;
        Ok(())
    }
}

/// Parses a duration string for CLI-style inputs. Re-exported for callers
/// that accept user-typed durations ahead of constructing a [`GrantRequest`].
#[must_use]
pub fn parse_grant_duration(input: &str) -> Option<StdDuration> {
    parse_duration(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (TemporaryPermissionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = TemporaryPermissionManager::new(dir.path().join("grants.json"))
            .await
            .unwrap();
        (manager, dir)
    }

    #[tokio::test]
    async fn grant_then_persist_roundtrip() {
        let (manager, dir) = manager().await;
        let outcome = manager
            .grant(GrantRequest {
                bundle_id: "com.example.app".into(),
                service: "Camera".into(),
                duration: StdDuration::from_secs(3600),
                reason: None,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, GrantOutcome::Granted(_)));

        let reloaded = TemporaryPermissionManager::new(dir.path().join("grants.json"))
            .await
            .unwrap();
        assert_eq!(reloaded.get_active().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_request_returns_already_exists() {
        let (manager, _dir) = manager().await;
        let request = || GrantRequest {
            bundle_id: "com.example.app".into(),
            service: "Camera".into(),
            duration: StdDuration::from_secs(3600),
            reason: None,
        };
        manager.grant(request()).await.unwrap();
        let second = manager.grant(request()).await.unwrap();
        assert!(matches!(second, GrantOutcome::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn zero_duration_rejected() {
        let (manager, _dir) = manager().await;
        let result = manager
            .grant(GrantRequest {
                bundle_id: "a".into(),
                service: "b".into(),
                duration: StdDuration::from_secs(0),
                reason: None,
            })
            .await;
        assert!(matches!(result, Err(PrivarionError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn over_24h_duration_rejected() {
        let (manager, _dir) = manager().await;
        let result = manager
            .grant(GrantRequest {
                bundle_id: "a".into(),
                service: "b".into(),
                duration: StdDuration::from_secs(25 * 3600),
                reason: None,
            })
            .await;
        assert!(matches!(result, Err(PrivarionError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn capacity_cap_denies_beyond_max() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TemporaryPermissionManager::new(dir.path().join("grants.json"))
            .await
            .unwrap()
            .with_max_concurrent_grants(1);
        manager
            .grant(GrantRequest {
                bundle_id: "a".into(),
                service: "Camera".into(),
                duration: StdDuration::from_secs(60),
                reason: None,
            })
            .await
            .unwrap();
        let second = manager
            .grant(GrantRequest {
                bundle_id: "b".into(),
                service: "Microphone".into(),
                duration: StdDuration::from_secs(60),
                reason: None,
            })
            .await;
        assert!(matches!(second, Err(PrivarionError::Denied(_))));
    }

    #[tokio::test]
    async fn revoke_removes_grant() {
        let (manager, _dir) = manager().await;
        let outcome = manager
            .grant(GrantRequest {
                bundle_id: "a".into(),
                service: "Camera".into(),
                duration: StdDuration::from_secs(60),
                reason: None,
            })
            .await
            .unwrap();
        let GrantOutcome::Granted(grant) = outcome else {
            panic!("expected Granted");
        };
        manager.revoke(&grant.id).await.unwrap();
        assert!(manager.get(&grant.id).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_expired_and_marks_near_expiry_notified() {
        let (manager, _dir) = manager().await;
        let outcome = manager
            .grant(GrantRequest {
                bundle_id: "a".into(),
                service: "Camera".into(),
                duration: StdDuration::from_secs(3600),
                reason: None,
            })
            .await
            .unwrap();
        let GrantOutcome::Granted(grant) = outcome else {
            panic!("expected Granted");
        };

        {
            let mut state = manager.state.lock().await;
            let g = state.grants.get_mut(&grant.id).unwrap();
            g.expires_at = Utc::now() + ChronoDuration::seconds(60);
        }

        let stats = manager.sweep_once().await.unwrap();
        assert_eq!(stats.removed_count, 0);
        assert_eq!(stats.notifications_sent, 1);
        assert!(manager.get(&grant.id).await.unwrap().notification_sent);
    }

    #[tokio::test]
    async fn grant_temporary_trait_impl_creates_grant() {
        let (manager, _dir) = manager().await;
        TemporaryGrantIssuer::grant_temporary(&manager, "a", "Accessibility", ChronoDuration::seconds(3600))
            .await
            .unwrap();
        assert!(manager.has_active("a", "Accessibility").await);
    }
}
