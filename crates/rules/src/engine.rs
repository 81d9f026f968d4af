use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use privarion_audit::Severity;
use privarion_backends::PermissionStore;
use privarion_core::PrivarionError;
use tracing::{info, instrument, warn};

use crate::policy::{default_policies, PermissionAction, PermissionPolicy, Priority};

/// A permission-access request submitted for evaluation.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: String,
    pub bundle_id: String,
    pub service: String,
    pub origin: String,
    pub timestamp: DateTime<Utc>,
    pub context: String,
}

/// Context a [`crate::condition::PermissionPolicyCondition`] evaluates
/// against: the request itself, the service's current recorded status, and
/// the requesting bundle's trimmed history.
pub struct EvalContext<'a> {
    pub request: &'a PermissionRequest,
    pub current_status: Option<&'a str>,
    pub history: &'a [PermissionRequest],
}

/// Final decision produced by [`PermissionPolicyEngine::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    AllowTemporary(DateTime<Utc>),
    RequireUserConsent,
    RequireAuthentication,
    Blocked(String),
}

/// Full result of one evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub request_id: String,
    pub decision: Decision,
    pub matched_policy_ids: Vec<String>,
    pub applied_actions: Vec<String>,
    pub evaluation_time: Duration,
    pub confidence: f64,
    pub reasoning: String,
}

/// Callback the engine invokes when an `AllowTemporary` action fires,
/// implemented by `privarion-permissions`'s temporary-grant manager.
/// Kept as a trait here (rather than a direct dependency) so the two crates
/// don't form a cycle.
#[async_trait]
pub trait TemporaryGrantIssuer: Send + Sync {
    async fn grant_temporary(
        &self,
        bundle_id: &str,
        service: &str,
        duration: chrono::Duration,
    ) -> Result<(), PrivarionError>;
}

/// No-op issuer used when the engine runs without a wired permissions
/// manager (e.g. isolated tests).
pub struct NoopGrantIssuer;

#[async_trait]
impl TemporaryGrantIssuer for NoopGrantIssuer {
    async fn grant_temporary(
        &self,
        _bundle_id: &str,
        _service: &str,
        _duration: chrono::Duration,
    ) -> Result<(), PrivarionError> {
        Ok(())
    }
}

const EVALUATION_BUDGET: Duration = Duration::from_millis(50);

/// Evaluates permission requests against a set of [`PermissionPolicy`]
/// entries under an admission cap, with side effects applied in matched
/// priority order.
pub struct PermissionPolicyEngine {
    policies: RwLock<Vec<PermissionPolicy>>,
    history: RwLock<std::collections::HashMap<String, Vec<PermissionRequest>>>,
    store: Arc<dyn PermissionStore>,
    grant_issuer: Arc<dyn TemporaryGrantIssuer>,
    max_concurrent: usize,
    in_flight: AtomicU64,
    engine_local_grants: RwLock<Vec<(String, String, DateTime<Utc>)>>,
}

impl PermissionPolicyEngine {
    #[must_use]
    pub fn new(store: Arc<dyn PermissionStore>, grant_issuer: Arc<dyn TemporaryGrantIssuer>) -> Self {
        Self {
            policies: RwLock::new(default_policies()),
            history: RwLock::new(std::collections::HashMap::new()),
            store,
            grant_issuer,
            max_concurrent: 10,
            in_flight: AtomicU64::new(0),
            engine_local_grants: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn add_policy(&self, policy: PermissionPolicy) {
        self.policies.write().push(policy);
    }

    #[instrument(skip_all, fields(bundle_id = %request.bundle_id, service = %request.service))]
    pub async fn evaluate(&self, request: PermissionRequest) -> Result<EvaluationResult, PrivarionError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if in_flight as usize > self.max_concurrent {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(PrivarionError::SystemOverloaded {
                in_flight: in_flight as usize,
                limit: self.max_concurrent,
            });
        }

        let result = tokio::time::timeout(EVALUATION_BUDGET, self.evaluate_inner(request)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(r) => r,
            Err(_) => Err(PrivarionError::SystemOverloaded {
                in_flight: in_flight as usize,
                limit: self.max_concurrent,
            }),
        }
    }

    async fn evaluate_inner(&self, request: PermissionRequest) -> Result<EvaluationResult, PrivarionError> {
        let started = std::time::Instant::now();

        if request.bundle_id.is_empty() || request.service.is_empty() {
            return Err(PrivarionError::InvalidRequest(
                "bundle_id and service must be non-empty".into(),
            ));
        }

        let history_snapshot = {
            let mut history = self.history.write();
            let bucket = history.entry(request.bundle_id.clone()).or_default();
            let snapshot = bucket.clone();
            bucket.push(request.clone());
            if bucket.len() > 100 {
                let excess = bucket.len() - 100;
                bucket.drain(0..excess);
            }
            snapshot
        };

        let current_status = self
            .store
            .get_status(&request.bundle_id, &request.service)
            .await?
            .map(|v| format!("{v:?}"));

        let eval_ctx = EvalContext {
            request: &request,
            current_status: current_status.as_deref(),
            history: &history_snapshot,
        };

        let mut matched: Vec<PermissionPolicy> = self
            .policies
            .read()
            .iter()
            .filter(|p| p.enabled && p.condition.evaluate(&eval_ctx))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        let matched_policy_ids: Vec<String> = matched.iter().map(|p| p.id.clone()).collect();
        let mut applied_actions = Vec::new();
        let mut decision = Decision::Allow;
        let mut decided = false;

        for policy in &matched {
            match &policy.action {
                PermissionAction::Deny if !decided => {
                    decision = Decision::Deny;
                    decided = true;
                }
                PermissionAction::Allow if !decided => {
                    decision = Decision::Allow;
                    decided = true;
                }
                PermissionAction::AllowTemporary(duration) if !decided => {
                    let expires_at = request.timestamp + *duration;
                    self.grant_issuer
                        .grant_temporary(&request.bundle_id, &request.service, *duration)
                        .await?;
                    self.engine_local_grants
                        .write()
                        .push((request.bundle_id.clone(), request.service.clone(), expires_at));
                    decision = Decision::AllowTemporary(expires_at);
                    decided = true;
                }
                PermissionAction::RequireUserConsent if !decided => {
                    decision = Decision::RequireUserConsent;
                    decided = true;
                }
                PermissionAction::RequireAuthentication if !decided => {
                    decision = Decision::RequireAuthentication;
                    decided = true;
                }
                PermissionAction::Quarantine(bundle_id) if !decided && bundle_id == &request.bundle_id => {
                    decision = Decision::Blocked("quarantined".into());
                    decided = true;
                }
                PermissionAction::LogAndAlert(severity) => {
                    applied_actions.push(format!("log_and_alert:{}", severity.as_str()));
                    warn!(policy = %policy.id, severity = %severity.as_str(), "policy log_and_alert fired");
                }
                PermissionAction::RateLimit(max, window) => {
                    applied_actions.push(format!("rate_limit:{max}:{}", window.num_seconds()));
                }
                _ => {}
            }
        }

        let critical_priority = Priority::Critical.weight() as f64;
        let confidence = if matched.is_empty() {
            1.0
        } else {
            let sum: u32 = matched.iter().map(|p| p.priority.weight()).sum();
            f64::from(sum) / (matched.len() as f64 * critical_priority)
        };

        info!(decision = ?decision, matched = matched_policy_ids.len(), "evaluation complete");

        Ok(EvaluationResult {
            request_id: request.request_id,
            decision,
            matched_policy_ids,
            applied_actions,
            evaluation_time: started.elapsed(),
            confidence,
            reasoning: format!("{} policies matched", matched.len()),
        })
    }

    /// Remove engine-local temporary grant cache entries past expiry.
    /// Driven every 60s by the application's background scheduler.
    pub async fn sweep_expired_grants(&self) {
        let now = Utc::now();
        let mut grants = self.engine_local_grants.write();
        let before = grants.len();
        grants.retain(|(_, _, expires_at)| *expires_at > now);
        let removed = before - grants.len();
        if removed > 0 {
            info!(removed, "swept expired engine-local temporary grants");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::InMemoryPermissionStore;

    fn engine() -> PermissionPolicyEngine {
        PermissionPolicyEngine::new(
            Arc::new(InMemoryPermissionStore::new()),
            Arc::new(NoopGrantIssuer),
        )
    }

    fn request(service: &str, bundle_id: &str) -> PermissionRequest {
        PermissionRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            bundle_id: bundle_id.into(),
            service: service.into(),
            origin: "UserInitiated".into(),
            timestamp: Utc::now(),
            context: "UserInitiated".into(),
        }
    }

    #[tokio::test]
    async fn no_matching_policy_defaults_to_allow() {
        let engine = engine();
        let result = engine.evaluate(request("Bluetooth", "com.app")).await.unwrap();
        assert_eq!(result.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn screen_capture_requires_authentication() {
        let engine = engine();
        let result = engine
            .evaluate(request("ScreenCapture", "com.app"))
            .await
            .unwrap();
        assert_eq!(result.decision, Decision::RequireAuthentication);
        assert!(result
            .matched_policy_ids
            .contains(&"screen-recording-critical".to_string()));
    }

    #[tokio::test]
    async fn sixth_microphone_request_triggers_rate_limit_action() {
        let engine = engine();
        for _ in 0..5 {
            engine
                .evaluate(request("Microphone", "com.app"))
                .await
                .unwrap();
        }
        let result = engine.evaluate(request("Microphone", "com.app")).await.unwrap();
        assert!(result
            .applied_actions
            .iter()
            .any(|a| a.starts_with("rate_limit")));
    }

    #[tokio::test]
    async fn empty_bundle_id_is_invalid_request() {
        let engine = engine();
        let err = engine.evaluate(request("Camera", "")).await.unwrap_err();
        assert!(matches!(err, PrivarionError::InvalidRequest(_)));
    }

    struct SlowStore {
        delay: Duration,
    }

    #[async_trait]
    impl PermissionStore for SlowStore {
        async fn connect(&self) -> Result<(), PrivarionError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), PrivarionError> {
            Ok(())
        }
        async fn enumerate(&self) -> Result<Vec<privarion_backends::Permission>, PrivarionError> {
            Ok(Vec::new())
        }
        async fn get_status(
            &self,
            _client: &str,
            _service: &str,
        ) -> Result<Option<privarion_backends::AuthValue>, PrivarionError> {
            tokio::time::sleep(self.delay).await;
            Ok(None)
        }
        async fn snapshot(&self, dest: &std::path::Path) -> Result<std::path::PathBuf, PrivarionError> {
            Ok(dest.to_path_buf())
        }
        async fn restore_from(&self, _source: &std::path::Path) -> Result<(), PrivarionError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn admission_cap_rejects_when_exceeded() {
        let engine = Arc::new(
            PermissionPolicyEngine::new(
                Arc::new(SlowStore {
                    delay: Duration::from_millis(30),
                }),
                Arc::new(NoopGrantIssuer),
            )
            .with_max_concurrent(1),
        );

        let e2 = engine.clone();
        let handle = tokio::spawn(async move { e2.evaluate(request("Camera", "com.app")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = engine.evaluate(request("Camera", "com.app")).await;
        let first = handle.await.unwrap();

        assert!(first.is_ok());
        assert!(matches!(second, Err(PrivarionError::SystemOverloaded { .. })));
    }

    #[tokio::test]
    async fn accessibility_user_initiated_grants_temporary() {
        let engine = engine();
        let result = engine
            .evaluate(request("Accessibility", "com.app"))
            .await
            .unwrap();
        assert!(matches!(result.decision, Decision::AllowTemporary(_)));
    }

    #[tokio::test]
    async fn sweep_removes_expired_engine_local_grants() {
        let engine = engine();
        engine
            .engine_local_grants
            .write()
            .push(("com.app".into(), "Accessibility".into(), Utc::now() - chrono::Duration::seconds(1)));
        engine.sweep_expired_grants().await;
        assert!(engine.engine_local_grants.read().is_empty());
    }
}
