use async_trait::async_trait;
use privarion_backends::{
    CommandExecutor, HookBackend, SyscallHookConfiguration,
};
use privarion_core::{IdentityType, PrivarionError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::generators::HardwareIdentifierEngine;
use crate::rollback::RollbackManager;
use crate::strategy::GenerationStrategy;
use crate::validators::{is_valid_hostname, is_valid_mac};

/// Per-identity-type policy consulted during a spoof call: whether it
/// participates, whether its failure is fatal to the whole operation, and
/// which generation strategy to use.
pub trait SpoofProfile: Send + Sync {
    fn is_enabled(&self, ty: IdentityType) -> bool;
    fn is_critical(&self, ty: IdentityType) -> bool;
    fn strategy_for(&self, ty: IdentityType) -> GenerationStrategy;
}

/// A profile whose enablement/criticality/strategy are fixed at construction.
pub struct StaticSpoofProfile {
    enabled: HashSet<IdentityType>,
    critical: HashSet<IdentityType>,
    strategy: GenerationStrategy,
}

impl StaticSpoofProfile {
    #[must_use]
    pub fn new(enabled: HashSet<IdentityType>, critical: HashSet<IdentityType>, strategy: GenerationStrategy) -> Self {
        Self {
            enabled,
            critical,
            strategy,
        }
    }

    /// A profile enabling every type with [`GenerationStrategy::Realistic`]
    /// and no type marked critical.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            enabled: IdentityType::ALL.iter().copied().collect(),
            critical: HashSet::new(),
            strategy: GenerationStrategy::Realistic,
        }
    }
}

impl SpoofProfile for StaticSpoofProfile {
    fn is_enabled(&self, ty: IdentityType) -> bool {
        self.enabled.contains(&ty)
    }

    fn is_critical(&self, ty: IdentityType) -> bool {
        self.critical.contains(&ty)
    }

    fn strategy_for(&self, _ty: IdentityType) -> GenerationStrategy {
        self.strategy.clone()
    }
}

/// Resolves a named profile. An external collaborator: profiles may come
/// from config files, a database, or (in tests) a fixed map.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn load(&self, name: &str) -> Result<Arc<dyn SpoofProfile>, PrivarionError>;
}

/// In-memory [`ProfileProvider`] keyed by name.
pub struct InMemoryProfileProvider {
    profiles: dashmap::DashMap<String, Arc<dyn SpoofProfile>>,
}

impl InMemoryProfileProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            profiles: dashmap::DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, profile: Arc<dyn SpoofProfile>) {
        self.profiles.insert(name.into(), profile);
    }
}

impl Default for InMemoryProfileProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileProvider for InMemoryProfileProvider {
    async fn load(&self, name: &str) -> Result<Arc<dyn SpoofProfile>, PrivarionError> {
        self.profiles
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| PrivarionError::InvalidRequest(format!("unknown spoof profile: {name}")))
    }
}

/// Parameters for a [`IdentitySpoofingManager::spoof`] call.
#[derive(Debug, Clone)]
pub struct SpoofOptions {
    pub types: Vec<IdentityType>,
    pub profile_name: String,
    pub persistent: bool,
    pub validate_changes: bool,
}

/// Outcome of a successful [`IdentitySpoofingManager::spoof`] call.
#[derive(Debug, Clone)]
pub struct SpoofOutcome {
    pub rollback_id: String,
    pub applied: Vec<IdentityType>,
    pub skipped: Vec<IdentityType>,
}

/// Composes hook-configuration updates for identity spoofing, with
/// rollback-on-failure.
pub struct IdentitySpoofingManager {
    executor: Arc<dyn CommandExecutor>,
    hook_backend: Arc<dyn HookBackend>,
    generator: HardwareIdentifierEngine,
    rollback: Arc<RollbackManager>,
    profiles: Arc<dyn ProfileProvider>,
}

impl IdentitySpoofingManager {
    #[must_use]
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        hook_backend: Arc<dyn HookBackend>,
        rollback: Arc<RollbackManager>,
        profiles: Arc<dyn ProfileProvider>,
    ) -> Self {
        Self {
            generator: HardwareIdentifierEngine::new(executor.clone()),
            executor,
            hook_backend,
            rollback,
            profiles,
        }
    }

    async fn verify_privilege(&self) -> Result<(), PrivarionError> {
        let out = self.executor.exec("id", &["-u".to_string()]).await?;
        let uid: u32 = out
            .stdout
            .trim()
            .parse()
            .map_err(|_| PrivarionError::AdminPrivilegesRequired)?;
        if uid != 0 {
            return Err(PrivarionError::AdminPrivilegesRequired);
        }
        Ok(())
    }

    fn validate_format(ty: IdentityType, value: &str) -> Result<(), PrivarionError> {
        let valid = match ty {
            IdentityType::MacAddress => is_valid_mac(value),
            IdentityType::Hostname => is_valid_hostname(value),
            _ => true,
        };
        if valid {
            Ok(())
        } else {
            Err(PrivarionError::InvalidIdentifierFormat(format!(
                "{ty} generated value `{value}` failed format validation"
            )))
        }
    }

    fn syscall_for(ty: IdentityType) -> Option<&'static str> {
        match ty {
            IdentityType::Hostname => Some("gethostname"),
            IdentityType::SystemVersion | IdentityType::KernelVersion | IdentityType::Architecture => {
                Some("uname")
            }
            IdentityType::UserId => Some("getuid"),
            IdentityType::GroupId => Some("getgid"),
            _ => None,
        }
    }

    fn apply_to_config(cfg: &mut SyscallHookConfiguration, ty: IdentityType, value: &str) -> Result<(), PrivarionError> {
        match ty {
            IdentityType::Hostname => cfg.fake_data.hostname = Some(value.to_string()),
            IdentityType::SystemVersion => cfg.fake_data.system_info.version = Some(value.to_string()),
            IdentityType::KernelVersion => cfg.fake_data.system_info.release = Some(value.to_string()),
            IdentityType::Architecture => cfg.fake_data.system_info.machine = Some(value.to_string()),
            IdentityType::UserId => {
                let uid: u32 = value
                    .parse()
                    .map_err(|_| PrivarionError::InvalidIdentifierFormat(value.to_string()))?;
                cfg.fake_data.user_id = Some(uid);
            }
            IdentityType::GroupId => {
                let gid: u32 = value
                    .parse()
                    .map_err(|_| PrivarionError::InvalidIdentifierFormat(value.to_string()))?;
                cfg.fake_data.group_id = Some(gid);
            }
            _ => {}
        }
        if let Some(syscall) = Self::syscall_for(ty) {
            cfg.set_enabled(syscall, true);
        }
        Ok(())
    }

    async fn apply_persistent(&self, ty: IdentityType, value: &str) -> Result<(), PrivarionError> {
        match ty {
            IdentityType::Hostname => {
                self.executor
                    .exec_privileged("scutil", &["--set".to_string(), "HostName".to_string(), value.to_string()])
                    .await?;
                Ok(())
            }
            IdentityType::MacAddress => {
                self.executor
                    .exec_privileged("ifconfig", &["en0".to_string(), "ether".to_string(), value.to_string()])
                    .await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Spoof the requested identity types per `options`. Captures a rollback
    /// point before any mutation; on any failure after capture, rolls back
    /// and (on rollback failure) substitutes `RollbackDataCorrupted`.
    #[instrument(skip(self), fields(profile = %options.profile_name, types = options.types.len()))]
    pub async fn spoof(&self, options: SpoofOptions) -> Result<SpoofOutcome, PrivarionError> {
        self.verify_privilege().await?;
        let profile = self.profiles.load(&options.profile_name).await?;

        let rollback_id = self.rollback.create_rollback_point(&options.types).await?;

        match self.apply_all(&options, profile.as_ref()).await {
            Ok((applied, skipped)) => Ok(SpoofOutcome {
                rollback_id,
                applied,
                skipped,
            }),
            Err(e) => {
                if let Err(rollback_err) = self.rollback.perform_rollback(&rollback_id).await {
                    warn!(error = %rollback_err, "rollback itself failed after spoof failure");
                    return Err(PrivarionError::RollbackDataCorrupted {
                        original: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn apply_all(
        &self,
        options: &SpoofOptions,
        profile: &dyn SpoofProfile,
    ) -> Result<(Vec<IdentityType>, Vec<IdentityType>), PrivarionError> {
        let mut cfg = self.hook_backend.current_configuration().await;
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for &ty in &options.types {
            if !profile.is_enabled(ty) {
                continue;
            }

            if let Err(e) = self.apply_one(&mut cfg, ty, profile, options.persistent).await {
                if profile.is_critical(ty) {
                    return Err(e);
                }
                warn!(identity_type = %ty, error = %e, "non-critical spoof step failed, continuing");
                skipped.push(ty);
                continue;
            }
            applied.push(ty);
        }

        self.hook_backend.update_configuration(cfg).await?;

        if options.validate_changes {
            self.log_observed_values(&applied).await;
        }

        Ok((applied, skipped))
    }

    async fn apply_one(
        &self,
        cfg: &mut SyscallHookConfiguration,
        ty: IdentityType,
        profile: &dyn SpoofProfile,
        persistent: bool,
    ) -> Result<(), PrivarionError> {
        if ty.is_unsupported_spoof_target() {
            warn!(identity_type = %ty, "spoof target not supported by this backend, skipping");
            return Ok(());
        }

        let strategy = profile.strategy_for(ty);
        let value = self.generator.generate_for(ty, &strategy);
        Self::validate_format(ty, &value)?;

        if ty.is_virtualizable() {
            Self::apply_to_config(cfg, ty, &value)?;
        }
        if persistent && ty.supports_persistent_spoof() {
            self.apply_persistent(ty, &value).await?;
        }
        if !ty.is_virtualizable() && !ty.supports_persistent_spoof() {
            warn!(identity_type = %ty, "no spoof technique implemented for this type, state unchanged");
        }

        Ok(())
    }

    async fn log_observed_values(&self, applied: &[IdentityType]) {
        let cfg = self.hook_backend.current_configuration().await;
        for &ty in applied {
            let observed = match ty {
                IdentityType::Hostname => cfg.fake_data.hostname.clone(),
                IdentityType::SystemVersion => cfg.fake_data.system_info.version.clone(),
                IdentityType::KernelVersion => cfg.fake_data.system_info.release.clone(),
                IdentityType::Architecture => cfg.fake_data.system_info.machine.clone(),
                IdentityType::UserId => cfg.fake_data.user_id.map(|v| v.to_string()),
                IdentityType::GroupId => cfg.fake_data.group_id.map(|v| v.to_string()),
                _ => None,
            };
            info!(identity_type = %ty, observed_value = ?observed, "validated spoofed identity value");
        }
    }

    /// Restore identity values to those captured before the last spoof of
    /// the requested types (or all types if `None`).
    pub async fn restore(&self, types: Option<&[IdentityType]>) -> Result<(), PrivarionError> {
        self.rollback.restore_original_values(types).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::{CommandOutput, NoopHookBackend, RecordingCommandExecutor};

    fn root_executor() -> Arc<RecordingCommandExecutor> {
        let exec = Arc::new(RecordingCommandExecutor::new());
        exec.script("id", &["-u"], CommandOutput::success("0"));
        exec
    }

    async fn manager_with(
        executor: Arc<RecordingCommandExecutor>,
    ) -> (IdentitySpoofingManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let rollback = Arc::new(
            RollbackManager::new(dir.path().to_path_buf(), executor.clone())
                .await
                .unwrap(),
        );
        let profiles = Arc::new(InMemoryProfileProvider::new());
        profiles.register("default", Arc::new(StaticSpoofProfile::permissive()));
        let hook_backend = Arc::new(NoopHookBackend::new());
        let manager = IdentitySpoofingManager::new(executor, hook_backend, rollback, profiles);
        (manager, dir)
    }

    #[tokio::test]
    async fn non_root_fails_with_admin_privileges_required() {
        let exec = Arc::new(RecordingCommandExecutor::new());
        exec.script("id", &["-u"], CommandOutput::success("501"));
        let (manager, _dir) = manager_with(exec).await;
        let result = manager
            .spoof(SpoofOptions {
                types: vec![IdentityType::Hostname],
                profile_name: "default".into(),
                persistent: false,
                validate_changes: false,
            })
            .await;
        assert!(matches!(result, Err(PrivarionError::AdminPrivilegesRequired)));
    }

    #[tokio::test]
    async fn unknown_profile_fails_before_any_mutation() {
        let (manager, _dir) = manager_with(root_executor()).await;
        let result = manager
            .spoof(SpoofOptions {
                types: vec![IdentityType::Hostname],
                profile_name: "nonexistent".into(),
                persistent: false,
                validate_changes: false,
            })
            .await;
        assert!(matches!(result, Err(PrivarionError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn spoofing_hostname_enables_hook_and_sets_fake_data() {
        let (manager, _dir) = manager_with(root_executor()).await;
        let outcome = manager
            .spoof(SpoofOptions {
                types: vec![IdentityType::Hostname],
                profile_name: "default".into(),
                persistent: false,
                validate_changes: true,
            })
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec![IdentityType::Hostname]);
        assert!(outcome.skipped.is_empty());
        assert!(!outcome.rollback_id.is_empty());
    }

    #[tokio::test]
    async fn unsupported_spoof_target_is_skipped_not_applied() {
        let (manager, _dir) = manager_with(root_executor()).await;
        let outcome = manager
            .spoof(SpoofOptions {
                types: vec![IdentityType::Username],
                profile_name: "default".into(),
                persistent: false,
                validate_changes: false,
            })
            .await
            .unwrap();
        assert!(outcome.applied.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn restore_delegates_to_rollback_manager() {
        let (manager, _dir) = manager_with(root_executor()).await;
        manager
            .spoof(SpoofOptions {
                types: vec![IdentityType::Hostname],
                profile_name: "default".into(),
                persistent: false,
                validate_changes: false,
            })
            .await
            .unwrap();
        manager.restore(Some(&[IdentityType::Hostname])).await.unwrap();
    }
}
