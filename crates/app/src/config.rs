use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use privarion_core::{IdentityType, PrivarionError};
use serde::Deserialize;

/// `[ephemeral]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EphemeralConfig {
    pub base_path: PathBuf,
    pub max_ephemeral_spaces: usize,
    pub test_mode: bool,
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/tmp/privarion/spaces"),
            max_ephemeral_spaces: 20,
            test_mode: false,
        }
    }
}

/// `[identity]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub rollback_dir: PathBuf,
    pub enabled: HashSet<IdentityType>,
    pub critical: HashSet<IdentityType>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            rollback_dir: PathBuf::from("/tmp/privarion/rollback"),
            enabled: HashSet::from(IdentityType::ALL),
            critical: HashSet::from([IdentityType::UserId, IdentityType::GroupId]),
        }
    }
}

/// `[permissions]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub grant_store_path: PathBuf,
    pub max_concurrent_grants: usize,
    pub notification_threshold_secs: i64,
    pub permission_db_path: Option<PathBuf>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            grant_store_path: PathBuf::from("/tmp/privarion/grants.json"),
            max_concurrent_grants: 100,
            notification_threshold_secs: 300,
            permission_db_path: None,
        }
    }
}

/// `[audit]` section, mirrored from `privarion_audit::AuditLoggerConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub log_dir: PathBuf,
    pub retention_days: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/tmp/privarion/audit"),
            retention_days: 30,
        }
    }
}

/// `[background]` section: the scheduler's tick intervals. Intervals are
/// expressed in whole milliseconds in TOML (`grant_cleanup_interval_ms =
/// 60000`) and converted to [`Duration`] via the `*_interval()` accessors;
/// tokio's `interval()` panics on a zero period, so a config with a tick
/// disabled still needs a nonzero value here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub grant_cleanup_interval_ms: u64,
    pub permission_poll_interval_ms: u64,
    pub audit_flush_interval_ms: u64,
    pub audit_rotation_check_interval_ms: u64,
    pub audit_cleanup_interval_ms: u64,
    pub enable_grant_cleanup: bool,
    pub enable_permission_poll: bool,
    pub enable_audit_maintenance: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            grant_cleanup_interval_ms: 60_000,
            permission_poll_interval_ms: 5_000,
            audit_flush_interval_ms: 5_000,
            audit_rotation_check_interval_ms: 300_000,
            audit_cleanup_interval_ms: 24 * 3_600_000,
            enable_grant_cleanup: true,
            enable_permission_poll: true,
            enable_audit_maintenance: true,
        }
    }
}

impl BackgroundConfig {
    #[must_use]
    pub fn grant_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.grant_cleanup_interval_ms.max(1))
    }

    #[must_use]
    pub fn permission_poll_interval(&self) -> Duration {
        Duration::from_millis(self.permission_poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn audit_flush_interval(&self) -> Duration {
        Duration::from_millis(self.audit_flush_interval_ms.max(1))
    }

    #[must_use]
    pub fn audit_rotation_check_interval(&self) -> Duration {
        Duration::from_millis(self.audit_rotation_check_interval_ms.max(1))
    }

    #[must_use]
    pub fn audit_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.audit_cleanup_interval_ms.max(1))
    }
}

/// Top-level configuration, loaded from a TOML file at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrivarionConfig {
    pub ephemeral: EphemeralConfig,
    pub identity: IdentityConfig,
    pub permissions: PermissionsConfig,
    pub audit: AuditConfig,
    pub background: BackgroundConfig,
}

impl PrivarionConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, PrivarionError> {
        toml::from_str(raw).map_err(|e| PrivarionError::InvalidConfiguration(e.to_string()))
    }

    /// Load configuration from a file on disk.
    pub async fn load(path: &Path) -> Result<Self, PrivarionError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = PrivarionConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.ephemeral.max_ephemeral_spaces, 20);
        assert_eq!(cfg.background.grant_cleanup_interval(), Duration::from_millis(60_000));
    }

    #[test]
    fn partial_section_overrides_only_named_fields() {
        let cfg = PrivarionConfig::from_toml_str(
            r#"
            [ephemeral]
            max_ephemeral_spaces = 5
            test_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ephemeral.max_ephemeral_spaces, 5);
        assert!(cfg.ephemeral.test_mode);
        assert_eq!(cfg.ephemeral.base_path, PathBuf::from("/tmp/privarion/spaces"));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = PrivarionConfig::from_toml_str("not = [valid").unwrap_err();
        assert!(matches!(err, PrivarionError::InvalidConfiguration(_)));
    }
}
