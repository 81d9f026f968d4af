use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity of an audit event, ordered from most to least urgent so a
/// configured floor can be compared with `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Alert => "alert",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Identifies the party that initiated or is affected by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub uid: Option<u32>,
    pub username: Option<String>,
}

/// Identifies the process a syscall/permission event is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessContext {
    pub pid: Option<i32>,
    pub name: Option<String>,
    pub bundle_id: Option<String>,
}

/// Network endpoint context attached to network-related events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
    pub protocol: Option<String>,
}

/// A single structured audit record. Every Privarion subsystem (ephemeral
/// filesystem manager, launcher, identity spoofing, permission engine,
/// monitoring engines) emits its lifecycle and security-relevant events as
/// one of these through an [`AuditSink`](crate::sink::AuditSink).
///
/// Serializes bijectively to JSON: `AuditEvent::from_json(&event.to_json()?)`
/// always reproduces an equal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<UserContext>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub process: Option<ProcessContext>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network: Option<NetworkContext>,
    pub outcome: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<Uuid>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        action: impl Into<String>,
        severity: Severity,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: "generic".to_string(),
            severity,
            source: source.into(),
            action: action.into(),
            resource: None,
            user: None,
            process: None,
            network: None,
            outcome: outcome.into(),
            details: HashMap::new(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn to_json_line(&self) -> Result<String, privarion_core::PrivarionError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_line(line: &str) -> Result<Self, privarion_core::PrivarionError> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_emergency_as_most_urgent() {
        assert!(Severity::Emergency < Severity::Debug);
        assert!(Severity::Critical < Severity::Warning);
    }

    #[test]
    fn json_round_trip_is_bijective() {
        let event = AuditEvent::new("launcher", "launch_application", Severity::Info, "success")
            .with_event_type("application_launch")
            .with_resource("/Applications/Foo.app")
            .with_detail("space_id", "abc-123")
            .with_correlation_id(Uuid::new_v4());

        let line = event.to_json_line().unwrap();
        let parsed = AuditEvent::from_json_line(&line).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let event = AuditEvent::new("monitor", "syscall_match", Severity::Warning, "alert");
        let line = event.to_json_line().unwrap();
        assert!(!line.contains("\"resource\""));
        assert!(!line.contains("\"correlationId\""));
    }
}
