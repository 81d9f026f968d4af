use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EvalContext;

/// Recursive condition tree a [`crate::policy::PermissionPolicy`] matches a
/// request against. `pattern` fields support a trailing `*` wildcard (prefix
/// match); anything without a `*` must match exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PermissionPolicyCondition {
    ServiceName(String),
    BundleId(String),
    PermissionStatus(String),
    RequestOrigin(String),
    Context(String),
    TimeWindow(DateTime<Utc>, DateTime<Utc>),
    FrequencyLimit(u32, chrono::Duration),
    And(Vec<PermissionPolicyCondition>),
    Or(Vec<PermissionPolicyCondition>),
    Not(Box<PermissionPolicyCondition>),
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

impl PermissionPolicyCondition {
    /// Recursively evaluate this condition against a request context.
    ///
    /// `FrequencyLimit(max, window)` is satisfied once the bundle's prior
    /// request count for this service within `window` reaches `max` — the
    /// (max+1)th request matches, not the max-th.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Self::ServiceName(pattern) => pattern_matches(pattern, ctx.request.service.as_str()),
            Self::BundleId(pattern) => pattern_matches(pattern, ctx.request.bundle_id.as_str()),
            Self::PermissionStatus(status) => ctx
                .current_status
                .as_deref()
                .is_some_and(|s| s == status),
            Self::RequestOrigin(origin) => ctx.request.origin.as_str() == origin,
            Self::Context(context) => ctx.request.context.as_str() == context,
            Self::TimeWindow(start, end) => {
                ctx.request.timestamp >= *start && ctx.request.timestamp <= *end
            }
            Self::FrequencyLimit(max, window) => {
                let cutoff = ctx.request.timestamp - *window;
                let count = ctx
                    .history
                    .iter()
                    .filter(|r| r.service == ctx.request.service && r.timestamp >= cutoff)
                    .count();
                count as u32 >= *max
            }
            Self::And(parts) => parts.iter().all(|p| p.evaluate(ctx)),
            Self::Or(parts) => parts.iter().any(|p| p.evaluate(ctx)),
            Self::Not(inner) => !inner.evaluate(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EvalContext, PermissionRequest};

    fn request(service: &str, bundle_id: &str) -> PermissionRequest {
        PermissionRequest {
            request_id: "req-1".into(),
            bundle_id: bundle_id.into(),
            service: service.into(),
            origin: "UserInitiated".into(),
            timestamp: Utc::now(),
            context: "UserInitiated".into(),
        }
    }

    #[test]
    fn service_name_pattern_matches_prefix() {
        let condition = PermissionPolicyCondition::ServiceName("kTCCService*".into());
        let req = request("kTCCServiceCamera", "com.example.app");
        let ctx = EvalContext {
            request: &req,
            current_status: None,
            history: &[],
        };
        assert!(condition.evaluate(&ctx));
    }

    #[test]
    fn and_requires_all_subconditions() {
        let condition = PermissionPolicyCondition::And(vec![
            PermissionPolicyCondition::ServiceName("Camera".into()),
            PermissionPolicyCondition::RequestOrigin("BackgroundTask".into()),
        ]);
        let req = request("Camera", "com.example.app");
        let ctx = EvalContext {
            request: &req,
            current_status: None,
            history: &[],
        };
        assert!(!condition.evaluate(&ctx));
    }

    #[test]
    fn frequency_limit_matches_on_nth_plus_one_request() {
        let now = Utc::now();
        let mut history = Vec::new();
        for i in 0..5 {
            history.push(PermissionRequest {
                request_id: format!("req-{i}"),
                bundle_id: "com.app".into(),
                service: "Microphone".into(),
                origin: "UserInitiated".into(),
                timestamp: now,
                context: "UserInitiated".into(),
            });
        }
        let condition = PermissionPolicyCondition::FrequencyLimit(5, chrono::Duration::seconds(300));
        let sixth = request("Microphone", "com.app");
        let ctx = EvalContext {
            request: &sixth,
            current_status: None,
            history: &history,
        };
        assert!(condition.evaluate(&ctx));

        let truncated = &history[..4];
        let ctx_fifth = EvalContext {
            request: &sixth,
            current_status: None,
            history: truncated,
        };
        assert!(!condition.evaluate(&ctx_fifth));
    }

    #[test]
    fn not_negates_inner_condition() {
        let condition = PermissionPolicyCondition::Not(Box::new(PermissionPolicyCondition::ServiceName(
            "Camera".into(),
        )));
        let req = request("Microphone", "com.app");
        let ctx = EvalContext {
            request: &req,
            current_status: None,
            history: &[],
        };
        assert!(condition.evaluate(&ctx));
    }
}
