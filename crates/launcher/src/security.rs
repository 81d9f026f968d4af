use std::path::Path;

use privarion_core::PrivarionError;

use crate::config::LaunchConfiguration;

/// Pre-launch security gate. The default implementation is a no-op — the
/// extension point exists for callers that want to layer codesign/
/// entitlement checks in front of a launch without touching
/// `ApplicationLauncher` itself.
pub trait LaunchSecurityValidator: Send + Sync {
    fn validate(&self, app_path: &Path, cfg: &LaunchConfiguration) -> Result<(), PrivarionError>;
}

#[derive(Debug, Default)]
pub struct NoopLaunchSecurityValidator;

impl LaunchSecurityValidator for NoopLaunchSecurityValidator {
    fn validate(&self, _app_path: &Path, _cfg: &LaunchConfiguration) -> Result<(), PrivarionError> {
        Ok(())
    }
}
