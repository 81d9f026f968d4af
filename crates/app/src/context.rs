use std::sync::Arc;

use privarion_audit::{AuditLogger, AuditLoggerConfig, FileSink, SystemLogSink};
use privarion_backends::{
    HostCommandExecutor, HostHookBackend, HostSnapshotBackend, InMemoryPermissionStore,
    PermissionStore,
};
use privarion_core::PrivarionError;
use privarion_ephemeral::{EphemeralFileSystemManager, EphemeralFileSystemManagerConfig};
use privarion_identity::{
    GenerationStrategy, IdentitySpoofingManager, InMemoryProfileProvider, RollbackManager,
    StaticSpoofProfile,
};
use privarion_launcher::ApplicationLauncher;
use privarion_monitor::SyscallMonitoringEngine;
use privarion_permissions::{PermissionMonitor, TemporaryPermissionManager};
use privarion_rules::PermissionPolicyEngine;

use crate::config::PrivarionConfig;

/// Every manager the application wires together, held behind `Arc` so the
/// background scheduler and any request-handling surface can share them
/// without re-acquiring ownership.
///
/// Construction order follows each manager's own dependency chain: backends
/// first, then the managers that drive them, then the cross-manager
/// collaborators (the rules engine's grant issuer, the launcher's ephemeral
/// manager) that need an already-built sibling.
#[derive(Clone)]
pub struct ApplicationContext {
    pub config: PrivarionConfig,
    pub ephemeral: Arc<EphemeralFileSystemManager>,
    pub launcher: Arc<ApplicationLauncher>,
    pub identity: Arc<IdentitySpoofingManager>,
    pub policy_engine: Arc<PermissionPolicyEngine>,
    pub grants: Arc<TemporaryPermissionManager>,
    pub permission_monitor: Arc<PermissionMonitor>,
    pub syscall_monitor: Arc<SyscallMonitoringEngine>,
    pub audit: Arc<AuditLogger>,
}

impl ApplicationContext {
    /// Build every manager from `config`, using the host-backed reference
    /// backends (`HostSnapshotBackend`, `HostCommandExecutor`,
    /// `HostHookBackend`) and an in-memory permission store unless a
    /// `permission_db_path` is configured.
    pub async fn build(config: PrivarionConfig) -> Result<Self, PrivarionError> {
        let executor = Arc::new(HostCommandExecutor::new());
        let snapshot_backend = Arc::new(HostSnapshotBackend::new(executor.clone()));
        let hook_backend = Arc::new(HostHookBackend::new());

        let permission_store: Arc<dyn PermissionStore> = match &config.permissions.permission_db_path {
            Some(path) => Arc::new(privarion_backends::HostPermissionStore::new(path.clone())),
            None => Arc::new(InMemoryPermissionStore::new()),
        };

        let ephemeral = Arc::new(EphemeralFileSystemManager::new(
            EphemeralFileSystemManagerConfig {
                base_path: config.ephemeral.base_path.clone(),
                max_ephemeral_spaces: config.ephemeral.max_ephemeral_spaces,
                test_mode: config.ephemeral.test_mode,
            },
            snapshot_backend,
            executor.clone(),
        ));

        let launcher = Arc::new(ApplicationLauncher::new(ephemeral.clone()));

        let rollback = Arc::new(
            RollbackManager::new(config.identity.rollback_dir.clone(), executor.clone()).await?,
        );
        let profiles = Arc::new(InMemoryProfileProvider::new());
        profiles.register(
            "default",
            Arc::new(StaticSpoofProfile::new(
                config.identity.enabled.clone(),
                config.identity.critical.clone(),
                GenerationStrategy::Realistic,
            )),
        );
        let identity = Arc::new(IdentitySpoofingManager::new(
            executor.clone(),
            hook_backend.clone(),
            rollback,
            profiles,
        ));

        let grants = Arc::new(
            TemporaryPermissionManager::new(config.permissions.grant_store_path.clone())
                .await?
                .with_max_concurrent_grants(config.permissions.max_concurrent_grants)
                .with_notification_threshold(chrono::Duration::seconds(
                    config.permissions.notification_threshold_secs,
                )),
        );

        let policy_engine = Arc::new(PermissionPolicyEngine::new(
            permission_store.clone(),
            grants.clone() as Arc<dyn privarion_rules::TemporaryGrantIssuer>,
        ));

        let permission_monitor = Arc::new(PermissionMonitor::new(permission_store));
        let syscall_monitor = Arc::new(SyscallMonitoringEngine::new(hook_backend));

        // The path given here is irrelevant: `AuditLogger::new` retargets
        // this sink at its own tracked active-file path before returning.
        let file_sink = Arc::new(FileSink::new(config.audit.log_dir.join("audit.log")));
        let audit = Arc::new(
            AuditLogger::new(
                AuditLoggerConfig {
                    log_dir: config.audit.log_dir.clone(),
                    retention_days: config.audit.retention_days,
                    ..AuditLoggerConfig::default()
                },
                vec![file_sink, Arc::new(SystemLogSink)],
            )
            .await?,
        );

        Ok(Self {
            config,
            ephemeral,
            launcher,
            identity,
            policy_engine,
            grants,
            permission_monitor,
            syscall_monitor,
            audit,
        })
    }

    /// Drain buffered audit events and tear down background-owned timers.
    /// Does not touch running launched processes — callers that want those
    /// terminated should call [`ApplicationLauncher::terminate_all`]
    /// explicitly first.
    pub async fn shutdown(&self) -> Result<(), PrivarionError> {
        self.ephemeral.stop_scheduled();
        self.audit.shutdown().await
    }
}
