use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use privarion_core::PrivarionError;
use privarion_ephemeral::EphemeralFileSystemManager;
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::LaunchConfiguration;
use crate::process::{ProcessHandle, ProcessResult};
use crate::security::{LaunchSecurityValidator, NoopLaunchSecurityValidator};

struct RunningEntry {
    handle: ProcessHandle,
    child: tokio::sync::Mutex<Child>,
    terminate: Notify,
    kill_requested: std::sync::atomic::AtomicBool,
}

/// Sanitizes `app_path`'s file stem into an uppercase env-var prefix, e.g.
/// `/Applications/My App.app` -> `MY_APP`.
fn env_prefix(app_path: &Path) -> String {
    let stem = app_path.file_stem().and_then(|s| s.to_str()).unwrap_or("APP");
    let mut out = String::with_capacity(stem.len());
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push_str("APP");
    }
    out
}

/// Spawns applications into ephemeral spaces and owns their lifecycle:
/// environment composition, timeout enforcement, and termination.
pub struct ApplicationLauncher {
    ephemeral: Arc<EphemeralFileSystemManager>,
    security: Arc<dyn LaunchSecurityValidator>,
    running: Arc<DashMap<Uuid, Arc<RunningEntry>>>,
    completed: Arc<DashMap<Uuid, ProcessResult>>,
}

impl ApplicationLauncher {
    #[must_use]
    pub fn new(ephemeral: Arc<EphemeralFileSystemManager>) -> Self {
        Self {
            ephemeral,
            security: Arc::new(NoopLaunchSecurityValidator),
            running: Arc::new(DashMap::new()),
            completed: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn with_security_validator(mut self, validator: Arc<dyn LaunchSecurityValidator>) -> Self {
        self.security = validator;
        self
    }

    async fn validate_executable(app_path: &Path) -> Result<(), PrivarionError> {
        let metadata = tokio::fs::metadata(app_path)
            .await
            .map_err(|_| PrivarionError::ApplicationNotFound(app_path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(PrivarionError::ApplicationNotFound(app_path.display().to_string()));
        }
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(PrivarionError::ApplicationNotExecutable(app_path.display().to_string()));
        }
        Ok(())
    }

    fn compose_env(app_path: &Path, space_id: Uuid, mount_path: &Path, cfg: &LaunchConfiguration) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = if cfg.inherit_env {
            std::env::vars().collect()
        } else {
            HashMap::new()
        };
        env.extend(cfg.custom_env.clone());

        let prefix = env_prefix(app_path);
        env.insert(format!("{prefix}_EPHEMERAL_SPACE"), space_id.to_string());
        env.insert(format!("{prefix}_EPHEMERAL_PATH"), mount_path.display().to_string());
        env.insert("TMPDIR".into(), mount_path.join("tmp").display().to_string());
        env.insert("HOME".into(), mount_path.join("home").display().to_string());
        env.insert(
            "PATH".into(),
            format!("{}:/usr/bin:/bin:/usr/sbin:/sbin", mount_path.join("bin").display()),
        );
        env
    }

    /// Steps 1-8 of the launch contract: resolve the space, validate the
    /// binary, compose the environment, spawn, and arm cleanup/timeout.
    #[instrument(skip(self, args, cfg), fields(space_id = %space_id, app = %app_path.display()))]
    pub async fn launch_in(
        &self,
        app_path: PathBuf,
        args: Vec<String>,
        space_id: Uuid,
        cfg: LaunchConfiguration,
    ) -> Result<ProcessHandle, PrivarionError> {
        let space = self
            .ephemeral
            .get_info(space_id)
            .ok_or_else(|| PrivarionError::EphemeralSpaceNotFound(space_id.to_string()))?;

        Self::validate_executable(&app_path).await?;
        self.security.validate(&app_path, &cfg)?;

        let env = Self::compose_env(&app_path, space_id, &space.mount_path, &cfg);
        let working_dir = cfg.working_dir.clone().unwrap_or_else(|| space.mount_path.clone());

        let mut command = Command::new(&app_path);
        command
            .args(&args)
            .env_clear()
            .envs(env)
            .current_dir(&working_dir)
            .kill_on_drop(true);
        if cfg.redirect_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command
            .spawn()
            .map_err(|e| PrivarionError::ProcessLaunchFailed(e.to_string()))?;
        let pid = child.id().ok_or_else(|| PrivarionError::ProcessLaunchFailed("child exited before pid was observed".into()))? as i32;

        let handle = ProcessHandle {
            id: Uuid::new_v4(),
            pid,
            space_id,
            app_path,
            launched_at: Utc::now(),
            config: cfg.clone(),
        };

        let entry = Arc::new(RunningEntry {
            handle: handle.clone(),
            child: tokio::sync::Mutex::new(child),
            terminate: Notify::new(),
            kill_requested: std::sync::atomic::AtomicBool::new(false),
        });
        self.running.insert(handle.id, Arc::clone(&entry));
        info!(handle_id = %handle.id, pid, "process launched");

        self.spawn_watcher(Arc::clone(&entry));

        if cfg.max_exec_time_seconds > 0 {
            let launcher = self.clone_handles();
            let handle_id = handle.id;
            let timeout = Duration::from_secs(u64::from(cfg.max_exec_time_seconds));
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if launcher.running.contains_key(&handle_id) {
                    warn!(handle_id = %handle_id, "max_exec_time_seconds elapsed, terminating");
                    let _ = launcher.terminate(handle_id).await;
                }
            });
        }

        Ok(handle)
    }

    /// Creates a fresh ephemeral space then delegates to [`Self::launch_in`].
    pub async fn launch_in_new_space(
        &self,
        app_path: PathBuf,
        args: Vec<String>,
        pid_hint: Option<i32>,
        cfg: LaunchConfiguration,
    ) -> Result<ProcessHandle, PrivarionError> {
        let space = self.ephemeral.create_space(pid_hint, Some(app_path.clone())).await?;
        self.launch_in(app_path, args, space.id, cfg).await
    }

    fn clone_handles(&self) -> Self {
        Self {
            ephemeral: Arc::clone(&self.ephemeral),
            security: Arc::clone(&self.security),
            running: Arc::clone(&self.running),
            completed: Arc::clone(&self.completed),
        }
    }

    /// Background task that awaits process exit (racing a termination
    /// request), stashes the [`ProcessResult`], and cascades space
    /// destruction when `kill_on_parent_exit` is set.
    fn spawn_watcher(&self, entry: Arc<RunningEntry>) {
        let running = Arc::clone(&self.running);
        let completed = Arc::clone(&self.completed);
        let ephemeral = Arc::clone(&self.ephemeral);
        let start = Instant::now();

        tokio::spawn(async move {
            let handle_id = entry.handle.id;
            let output = loop {
                let wait_result = {
                    let mut guard = entry.child.lock().await;
                    tokio::select! {
                        res = guard.wait() => Some(Ok(res)),
                        () = entry.terminate.notified() => None,
                    }
                };
                match wait_result {
                    Some(res) => break res,
                    None => {
                        if entry.kill_requested.load(std::sync::atomic::Ordering::SeqCst) {
                            let mut guard = entry.child.lock().await;
                            let _ = guard.start_kill();
                        }
                    }
                }
            };

            let execution_time = start.elapsed();
            let exit_code = match &output {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            };

            let result = ProcessResult {
                handle: entry.handle.clone(),
                exit_code,
                execution_time,
                stdout: None,
                stderr: None,
                resource_usage: None,
            };

            running.remove(&handle_id);
            completed.insert(handle_id, result);

            if entry.handle.config.kill_on_parent_exit {
                if let Err(e) = ephemeral.destroy_space(entry.handle.space_id).await {
                    warn!(handle_id = %handle_id, error = %e, "failed to destroy bound space after process exit");
                }
            }
            info!(handle_id = %handle_id, exit_code, "process completed");
        });
    }

    /// Terminates a running process, or returns the stored result if it
    /// already completed. Idempotent with the process exiting naturally.
    pub async fn terminate(&self, handle_id: Uuid) -> Result<ProcessResult, PrivarionError> {
        if let Some(result) = self.completed.get(&handle_id) {
            return Ok(result.clone());
        }

        let Some(entry) = self.running.get(&handle_id).map(|e| Arc::clone(&e)) else {
            return Err(PrivarionError::ProcessTerminationFailed(format!(
                "no handle {handle_id}"
            )));
        };

        entry.kill_requested.store(true, std::sync::atomic::Ordering::SeqCst);
        entry.terminate.notify_one();

        for _ in 0..200 {
            if let Some(result) = self.completed.get(&handle_id) {
                return Ok(result.clone());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Err(PrivarionError::ProcessTerminationFailed(format!(
            "handle {handle_id} did not terminate in time"
        )))
    }

    #[must_use]
    pub fn get_running(&self) -> Vec<ProcessHandle> {
        self.running.iter().map(|e| e.handle.clone()).collect()
    }

    /// Fans out `terminate` across every running handle concurrently.
    pub async fn terminate_all(&self) -> Vec<Result<ProcessResult, PrivarionError>> {
        let ids: Vec<Uuid> = self.running.iter().map(|e| e.handle.id).collect();
        futures::future::join_all(ids.into_iter().map(|id| self.terminate(id))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::{InMemorySnapshotBackend, RecordingCommandExecutor};
    use privarion_ephemeral::EphemeralFileSystemManagerConfig;

    async fn launcher_with_space() -> (tempfile::TempDir, Arc<EphemeralFileSystemManager>, ApplicationLauncher, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let config = EphemeralFileSystemManagerConfig {
            base_path: dir.path().to_path_buf(),
            max_ephemeral_spaces: 4,
            test_mode: true,
        };
        let ephemeral = Arc::new(EphemeralFileSystemManager::new(
            config,
            Arc::new(InMemorySnapshotBackend::new()),
            Arc::new(RecordingCommandExecutor::new()),
        ));
        let space = ephemeral.create_space(None, None).await.unwrap();
        let launcher = ApplicationLauncher::new(Arc::clone(&ephemeral));
        (dir, ephemeral, launcher, space.id)
    }

    #[tokio::test]
    async fn launch_in_unknown_space_fails() {
        let (_dir, _ephemeral, launcher, _space_id) = launcher_with_space().await;
        let err = launcher
            .launch_in(PathBuf::from("/bin/true"), vec![], Uuid::new_v4(), LaunchConfiguration::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PrivarionError::EphemeralSpaceNotFound(_)));
    }

    #[tokio::test]
    async fn launch_in_missing_binary_fails() {
        let (_dir, _ephemeral, launcher, space_id) = launcher_with_space().await;
        let err = launcher
            .launch_in(PathBuf::from("/no/such/binary"), vec![], space_id, LaunchConfiguration::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PrivarionError::ApplicationNotFound(_)));
    }

    #[tokio::test]
    async fn launch_in_non_executable_file_fails() {
        let (_dir, _ephemeral, launcher, space_id) = launcher_with_space().await;
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = launcher
            .launch_in(file.path().to_path_buf(), vec![], space_id, LaunchConfiguration::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PrivarionError::ApplicationNotExecutable(_)));
    }

    #[tokio::test]
    async fn launch_in_runs_to_completion_without_explicit_terminate() {
        let (_dir, _ephemeral, launcher, space_id) = launcher_with_space().await;
        let mut cfg = LaunchConfiguration::default();
        cfg.kill_on_parent_exit = false;
        let handle = launcher
            .launch_in(PathBuf::from("/bin/true"), vec![], space_id, cfg)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let result = launcher.terminate(handle.id).await.unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn terminate_kills_a_still_running_process() {
        let (_dir, _ephemeral, launcher, space_id) = launcher_with_space().await;
        let mut cfg = LaunchConfiguration::default();
        cfg.kill_on_parent_exit = false;
        let handle = launcher
            .launch_in(PathBuf::from("/bin/sleep"), vec!["30".into()], space_id, cfg)
            .await
            .unwrap();

        assert_eq!(launcher.get_running().len(), 1);
        let result = launcher.terminate(handle.id).await.unwrap();
        assert_ne!(result.exit_code, 0);
        assert!(launcher.get_running().is_empty());
    }

    #[tokio::test]
    async fn max_exec_time_seconds_terminates_automatically() {
        let (_dir, _ephemeral, launcher, space_id) = launcher_with_space().await;
        let mut cfg = LaunchConfiguration::default();
        cfg.kill_on_parent_exit = false;
        cfg.max_exec_time_seconds = 1;
        let handle = launcher
            .launch_in(PathBuf::from("/bin/sleep"), vec!["30".into()], space_id, cfg)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let result = launcher.terminate(handle.id).await.unwrap();
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn kill_on_parent_exit_destroys_the_bound_space() {
        let (_dir, ephemeral, launcher, space_id) = launcher_with_space().await;
        let mut cfg = LaunchConfiguration::default();
        cfg.kill_on_parent_exit = true;
        let handle = launcher
            .launch_in(PathBuf::from("/bin/true"), vec![], space_id, cfg)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = launcher.terminate(handle.id).await;
        assert!(ephemeral.get_info(space_id).is_none());
    }

    #[test]
    fn env_prefix_sanitizes_app_name() {
        assert_eq!(env_prefix(Path::new("/Applications/My App.app")), "MY_APP");
        assert_eq!(env_prefix(Path::new("/bin/true")), "TRUE");
    }
}
