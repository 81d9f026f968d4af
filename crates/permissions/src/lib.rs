pub mod duration;
pub mod grant;
pub mod monitor;

pub use duration::parse_duration;
pub use grant::{
    CleanupStats, GrantOutcome, GrantRequest, TemporaryPermissionGrant, TemporaryPermissionManager,
};
pub use monitor::{
    risk_score, sensitivity_level, ChangeType, PermissionAlert, PermissionChange, PermissionMonitor,
    ProfileRiskLevel, SensitivityLevel,
};
