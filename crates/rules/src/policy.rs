use serde::{Deserialize, Serialize};

use crate::condition::PermissionPolicyCondition;
use privarion_audit::Severity;

/// Relative ordering used to resolve matched policies: `Critical` decides
/// before `High`, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    #[must_use]
    pub fn weight(self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// Side effect or decision a matched policy contributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PermissionAction {
    Allow,
    Deny,
    AllowTemporary(chrono::Duration),
    RequireUserConsent,
    RequireAuthentication,
    LogAndAlert(Severity),
    Quarantine(String),
    RateLimit(u32, chrono::Duration),
}

/// One rule in the engine's policy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub condition: PermissionPolicyCondition,
    pub action: PermissionAction,
    pub priority: Priority,
    pub enabled: bool,
}

impl PermissionPolicy {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: PermissionPolicyCondition,
        action: PermissionAction,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition,
            action,
            priority,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// The four policies seeded into every new [`crate::engine::PermissionPolicyEngine`].
#[must_use]
pub fn default_policies() -> Vec<PermissionPolicy> {
    vec![
        PermissionPolicy::new(
            "camera-suspicious-background",
            "Camera access from a background task",
            PermissionPolicyCondition::And(vec![
                PermissionPolicyCondition::ServiceName("Camera".into()),
                PermissionPolicyCondition::RequestOrigin("BackgroundTask".into()),
            ]),
            PermissionAction::RequireUserConsent,
            Priority::High,
        ),
        PermissionPolicy::new(
            "microphone-rate-limit",
            "Throttle repeated microphone requests",
            PermissionPolicyCondition::And(vec![
                PermissionPolicyCondition::ServiceName("Microphone".into()),
                PermissionPolicyCondition::FrequencyLimit(5, chrono::Duration::seconds(300)),
            ]),
            PermissionAction::RateLimit(5, chrono::Duration::seconds(300)),
            Priority::Medium,
        ),
        PermissionPolicy::new(
            "screen-recording-critical",
            "Screen capture always requires authentication",
            PermissionPolicyCondition::ServiceName("ScreenCapture".into()),
            PermissionAction::RequireAuthentication,
            Priority::Critical,
        ),
        PermissionPolicy::new(
            "accessibility-temp-allow",
            "Grant accessibility temporarily for user-initiated requests",
            PermissionPolicyCondition::And(vec![
                PermissionPolicyCondition::ServiceName("Accessibility".into()),
                PermissionPolicyCondition::Context("UserInitiated".into()),
            ]),
            PermissionAction::AllowTemporary(chrono::Duration::seconds(3600)),
            Priority::Medium,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policies_are_all_enabled() {
        assert!(default_policies().iter().all(|p| p.enabled));
    }

    #[test]
    fn priority_ordering_is_critical_highest() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn seeds_exactly_four_named_policies() {
        let names: Vec<_> = default_policies().into_iter().map(|p| p.id).collect();
        assert_eq!(
            names,
            vec![
                "camera-suspicious-background",
                "microphone-rate-limit",
                "screen-recording-critical",
                "accessibility-temp-allow",
            ]
        );
    }
}
