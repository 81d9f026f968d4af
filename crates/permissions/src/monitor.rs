use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use privarion_audit::Severity;
use privarion_backends::{AuthValue, PermissionStore};
use privarion_core::PrivarionError;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

const ALERT_RING_CAPACITY: usize = 100;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How sensitive a service's access is, independent of whether it is
/// currently granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SensitivityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SensitivityLevel {
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            SensitivityLevel::Low => 1.0,
            SensitivityLevel::Medium => 2.0,
            SensitivityLevel::High => 3.0,
            SensitivityLevel::Critical => 4.0,
        }
    }
}

/// Looks up the sensitivity of a TCC-style service name.
#[must_use]
pub fn sensitivity_level(service: &str) -> SensitivityLevel {
    const CRITICAL: [&str; 5] = ["Camera", "Microphone", "Location", "ScreenCapture", "ListenEvent"];
    const HIGH: [&str; 3] = ["SystemPolicyAllFiles", "Accessibility", "AppleEvents"];
    const MEDIUM: [&str; 7] = [
        "AddressBook",
        "Calendar",
        "Reminders",
        "Photos",
        "FileProviderPresence",
        "MediaLibrary",
        "SpeechRecognition",
    ];

    if CRITICAL.contains(&service) {
        SensitivityLevel::Critical
    } else if HIGH.contains(&service) {
        SensitivityLevel::High
    } else if MEDIUM.contains(&service) {
        SensitivityLevel::Medium
    } else {
        SensitivityLevel::Low
    }
}

fn is_granted(value: AuthValue) -> bool {
    matches!(value, AuthValue::Allowed | AuthValue::Limited)
}

/// Risk score for a single permission: sensitivity weight scaled down when
/// not currently granted.
#[must_use]
pub fn risk_score(service: &str, value: AuthValue) -> f64 {
    let weight = sensitivity_level(service).weight();
    if is_granted(value) {
        weight
    } else {
        weight * 0.1
    }
}

/// The kind of transition a [`PermissionChange`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Granted,
    Denied,
    Revoked,
    Modified,
}

#[derive(Debug, Clone)]
pub struct PermissionChange {
    pub bundle_id: String,
    pub service: String,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PermissionAlert {
    pub id: String,
    pub bundle_id: String,
    pub service: String,
    pub severity: Severity,
    pub change_type: ChangeType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Aggregate risk assessment for a single bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileRiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Polls a [`PermissionStore`], diffs successive snapshots, and raises
/// alerts for permission changes on sensitive services.
pub struct PermissionMonitor {
    store: Arc<dyn PermissionStore>,
    poll_interval: Duration,
    last_snapshot: Mutex<HashMap<(String, String), AuthValue>>,
    alerts: Mutex<VecDeque<PermissionAlert>>,
}

impl PermissionMonitor {
    #[must_use]
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_snapshot: Mutex::new(HashMap::new()),
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn severity_for(change_type: ChangeType, sensitivity: SensitivityLevel) -> Severity {
        match (change_type, sensitivity) {
            (ChangeType::Granted, SensitivityLevel::Critical) => Severity::Critical,
            (ChangeType::Granted, SensitivityLevel::High) => Severity::Error,
            (ChangeType::Granted, _) => Severity::Warning,
            (ChangeType::Modified, SensitivityLevel::Critical) => Severity::Warning,
            (ChangeType::Modified, _) => Severity::Notice,
            (ChangeType::Denied | ChangeType::Revoked, _) => Severity::Info,
        }
    }

    /// One poll pass: enumerate the store, diff against the last snapshot,
    /// emit changes and alerts, and update the snapshot.
    pub async fn poll_once(&self) -> Result<Vec<PermissionChange>, PrivarionError> {
        let current = self.store.enumerate().await?;
        let now = Utc::now();

        let mut current_map: HashMap<(String, String), AuthValue> = HashMap::new();
        for perm in &current {
            current_map.insert((perm.service.clone(), perm.client.clone()), perm.auth_value);
        }

        let mut snapshot = self.last_snapshot.lock().await;
        let mut changes = Vec::new();

        for (key, &value) in &current_map {
            let (service, bundle_id) = key.clone();
            match snapshot.get(key) {
                None => {
                    if is_granted(value) {
                        changes.push(PermissionChange {
                            bundle_id,
                            service,
                            change_type: ChangeType::Granted,
                            timestamp: now,
                        });
                    }
                }
                Some(&previous) if previous != value => {
                    let change_type = if is_granted(value) {
                        ChangeType::Granted
                    } else if value == AuthValue::Denied {
                        ChangeType::Denied
                    } else {
                        ChangeType::Modified
                    };
                    changes.push(PermissionChange {
                        bundle_id,
                        service,
                        change_type,
                        timestamp: now,
                    });
                }
                Some(_) => {}
            }
        }

        for key in snapshot.keys() {
            if !current_map.contains_key(key) {
                let (service, bundle_id) = key.clone();
                changes.push(PermissionChange {
                    bundle_id,
                    service,
                    change_type: ChangeType::Revoked,
                    timestamp: now,
                });
            }
        }

        *snapshot = current_map;
        drop(snapshot);

        let mut alerts = self.alerts.lock().await;
        for change in &changes {
            let sensitivity = sensitivity_level(&change.service);
            let severity = Self::severity_for(change.change_type, sensitivity);
            let alert = PermissionAlert {
                id: Uuid::new_v4().to_string(),
                bundle_id: change.bundle_id.clone(),
                service: change.service.clone(),
                severity,
                change_type: change.change_type,
                message: format!(
                    "{} {:?} permission for {} ({:?} sensitivity)",
                    change.bundle_id, change.change_type, change.service, sensitivity
                ),
                timestamp: change.timestamp,
                acknowledged: false,
            };
            alerts.push_back(alert);
            if alerts.len() > ALERT_RING_CAPACITY {
                alerts.pop_front();
            }
        }

        Ok(changes)
    }

    pub async fn alerts(&self) -> Vec<PermissionAlert> {
        self.alerts.lock().await.iter().cloned().collect()
    }

    pub async fn acknowledge(&self, id: &str) -> bool {
        let mut alerts = self.alerts.lock().await;
        if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
            alert.acknowledged = true;
            true
        } else {
            false
        }
    }

    /// Aggregate risk score and level for a bundle, from the last snapshot.
    pub async fn risk_profile(&self, bundle_id: &str) -> (f64, ProfileRiskLevel) {
        let snapshot = self.last_snapshot.lock().await;
        let mut total = 0.0;
        let mut any_critical_granted = false;
        let mut any_high_granted = false;

        for ((service, bundle), &value) in snapshot.iter() {
            if bundle != bundle_id {
                continue;
            }
            let sensitivity = sensitivity_level(service);
            total += risk_score(service, value);
            if is_granted(value) {
                match sensitivity {
                    SensitivityLevel::Critical => any_critical_granted = true,
                    SensitivityLevel::High => any_high_granted = true,
                    _ => {}
                }
            }
        }

        let level = if any_critical_granted {
            ProfileRiskLevel::Critical
        } else if any_high_granted {
            ProfileRiskLevel::High
        } else if total > 5.0 {
            ProfileRiskLevel::Medium
        } else {
            ProfileRiskLevel::Low
        };

        (total, level)
    }

    /// Polls [`poll_once`](Self::poll_once) forever on `poll_interval`.
    pub async fn run_poll_loop(&self) -> ! {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "permission monitor poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::{InMemoryPermissionStore, Permission};

    #[tokio::test]
    async fn first_poll_with_granted_permission_emits_granted_change() {
        let store = Arc::new(InMemoryPermissionStore::new());
        store.seed(Permission::new("Camera", "com.example.app", AuthValue::Allowed));
        let monitor = PermissionMonitor::new(store);

        let changes = monitor.poll_once().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Granted);
        assert_eq!(monitor.alerts().await.len(), 1);
        assert_eq!(monitor.alerts().await[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn revoked_permission_is_detected_on_next_poll() {
        let store = Arc::new(InMemoryPermissionStore::new());
        store.seed(Permission::new("Camera", "com.example.app", AuthValue::Allowed));
        let monitor = PermissionMonitor::new(store.clone());
        monitor.poll_once().await.unwrap();

        store.revoke("com.example.app", "Camera").await.unwrap();
        let changes = monitor.poll_once().await.unwrap();
        assert!(changes.iter().any(|c| c.change_type == ChangeType::Denied));
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert_returns_false() {
        let store = Arc::new(InMemoryPermissionStore::new());
        let monitor = PermissionMonitor::new(store);
        assert!(!monitor.acknowledge("missing").await);
    }

    #[tokio::test]
    async fn risk_profile_is_critical_when_critical_service_granted() {
        let store = Arc::new(InMemoryPermissionStore::new());
        store.seed(Permission::new("Camera", "com.example.app", AuthValue::Allowed));
        let monitor = PermissionMonitor::new(store);
        monitor.poll_once().await.unwrap();

        let (_, level) = monitor.risk_profile("com.example.app").await;
        assert_eq!(level, ProfileRiskLevel::Critical);
    }
}
