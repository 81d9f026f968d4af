use async_trait::async_trait;
use parking_lot::RwLock;
use privarion_core::PrivarionError;
use std::collections::HashMap;
use tracing::warn;

/// Syscalls this engine knows how to virtualize. Anything outside this set
/// is reported as [`InstallStatus::NotSupported`] rather than silently
/// ignored.
pub const SUPPORTED_SYSCALLS: [&str; 4] = ["gethostname", "getuid", "getgid", "uname"];

/// Fake values returned by `uname`-family syscalls once the corresponding
/// hook is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfoFake {
    pub nodename: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub machine: Option<String>,
}

/// Fake identity values a hook installation should serve once enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeData {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub user_id: Option<u32>,
    pub group_id: Option<u32>,
    pub system_info: SystemInfoFake,
}

/// The full desired state of syscall hooks, applied atomically by
/// `update_configuration`.
///
/// `hooks` maps a syscall name (e.g. `"gethostname"`) to whether it should
/// currently be intercepted. Toggling a hook off does not clear the
/// corresponding `fake_data` field — a later re-enable reuses the last
/// configured value unless explicitly overwritten.
#[derive(Debug, Clone, Default)]
pub struct SyscallHookConfiguration {
    pub hooks: HashMap<String, bool>,
    pub fake_data: FakeData,
}

impl SyscallHookConfiguration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_enabled(&self, syscall: &str) -> bool {
        self.hooks.get(syscall).copied().unwrap_or(false)
    }

    pub fn set_enabled(&mut self, syscall: impl Into<String>, enabled: bool) {
        self.hooks.insert(syscall.into(), enabled);
    }
}

/// Outcome of attempting to install a hook for one syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    NotSupported(String),
    Failed(String),
}

/// Installs, removes, and updates syscall-result hooks, and exposes the
/// fake-value configuration those hooks serve.
///
/// This is an external collaborator: Privarion's core logic depends only on
/// this trait. Real hook injection (e.g. `DYLD_INSERT_LIBRARIES` shims) is
/// out of scope for this repository — [`HostHookBackend`] documents the
/// integration seam without implementing the injection itself.
#[async_trait]
pub trait HookBackend: Send + Sync {
    /// One-time backend setup. Called once before any other method.
    async fn initialize(&self) -> Result<(), PrivarionError>;

    /// Whether this backend can actually intercept syscalls on the current
    /// platform.
    fn is_platform_supported(&self) -> bool;

    /// Replace the full hook configuration atomically.
    async fn update_configuration(
        &self,
        cfg: SyscallHookConfiguration,
    ) -> Result<(), PrivarionError>;

    /// Read back the currently applied configuration.
    async fn current_configuration(&self) -> SyscallHookConfiguration;

    /// Install hooks for every syscall the current configuration enables.
    /// Returns the per-syscall outcome.
    async fn install_configured_hooks(&self) -> HashMap<String, InstallStatus>;

    /// Tear down every installed hook.
    async fn remove_all_hooks(&self) -> Result<(), PrivarionError>;
}

/// In-memory [`HookBackend`] used by tests and by the identity manager when
/// no real injection backend is wired up. Tracks configuration state and
/// faithfully reports which syscalls are supported, without touching the
/// host.
pub struct NoopHookBackend {
    config: RwLock<SyscallHookConfiguration>,
    installed: RwLock<HashMap<String, InstallStatus>>,
}

impl NoopHookBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RwLock::new(SyscallHookConfiguration::new()),
            installed: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for NoopHookBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookBackend for NoopHookBackend {
    async fn initialize(&self) -> Result<(), PrivarionError> {
        Ok(())
    }

    fn is_platform_supported(&self) -> bool {
        true
    }

    async fn update_configuration(
        &self,
        cfg: SyscallHookConfiguration,
    ) -> Result<(), PrivarionError> {
        *self.config.write() = cfg;
        Ok(())
    }

    async fn current_configuration(&self) -> SyscallHookConfiguration {
        self.config.read().clone()
    }

    async fn install_configured_hooks(&self) -> HashMap<String, InstallStatus> {
        let cfg = self.config.read();
        let mut result = HashMap::new();
        for (syscall, enabled) in &cfg.hooks {
            if !enabled {
                continue;
            }
            let status = if SUPPORTED_SYSCALLS.contains(&syscall.as_str()) {
                InstallStatus::Installed
            } else {
                warn!(syscall = %syscall, "hook not supported by this backend");
                InstallStatus::NotSupported(syscall.clone())
            };
            result.insert(syscall.clone(), status);
        }
        drop(cfg);
        *self.installed.write() = result.clone();
        result
    }

    async fn remove_all_hooks(&self) -> Result<(), PrivarionError> {
        self.installed.write().clear();
        Ok(())
    }
}

/// Stub for a real hook-injection backend. Documents the trait-level
/// contract a production implementation must satisfy; reports itself as
/// platform-unsupported so callers fail closed rather than silently no-op.
pub struct HostHookBackend {
    inner: NoopHookBackend,
}

impl HostHookBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: NoopHookBackend::new(),
        }
    }
}

impl Default for HostHookBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookBackend for HostHookBackend {
    async fn initialize(&self) -> Result<(), PrivarionError> {
        self.inner.initialize().await
    }

    fn is_platform_supported(&self) -> bool {
        false
    }

    async fn update_configuration(
        &self,
        cfg: SyscallHookConfiguration,
    ) -> Result<(), PrivarionError> {
        self.inner.update_configuration(cfg).await
    }

    async fn current_configuration(&self) -> SyscallHookConfiguration {
        self.inner.current_configuration().await
    }

    async fn install_configured_hooks(&self) -> HashMap<String, InstallStatus> {
        self.inner.install_configured_hooks().await
    }

    async fn remove_all_hooks(&self) -> Result<(), PrivarionError> {
        self.inner.remove_all_hooks().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_and_read_back_configuration() {
        let backend = NoopHookBackend::new();
        let mut cfg = SyscallHookConfiguration::new();
        cfg.set_enabled("gethostname", true);
        cfg.fake_data.hostname = Some("dev-1234".into());
        backend.update_configuration(cfg).await.unwrap();

        let read = backend.current_configuration().await;
        assert!(read.is_enabled("gethostname"));
        assert_eq!(read.fake_data.hostname.as_deref(), Some("dev-1234"));
    }

    #[tokio::test]
    async fn install_reports_unsupported_syscalls() {
        let backend = NoopHookBackend::new();
        let mut cfg = SyscallHookConfiguration::new();
        cfg.set_enabled("gethostname", true);
        cfg.set_enabled("ptrace", true);
        backend.update_configuration(cfg).await.unwrap();

        let statuses = backend.install_configured_hooks().await;
        assert_eq!(statuses.get("gethostname"), Some(&InstallStatus::Installed));
        assert!(matches!(
            statuses.get("ptrace"),
            Some(InstallStatus::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn remove_all_hooks_clears_installed_state() {
        let backend = NoopHookBackend::new();
        let mut cfg = SyscallHookConfiguration::new();
        cfg.set_enabled("getuid", true);
        backend.update_configuration(cfg).await.unwrap();
        backend.install_configured_hooks().await;

        backend.remove_all_hooks().await.unwrap();
        assert!(backend.installed.read().is_empty());
    }

    #[test]
    fn host_backend_reports_unsupported_platform() {
        let backend = HostHookBackend::new();
        assert!(!backend.is_platform_supported());
    }
}
