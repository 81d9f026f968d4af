use async_trait::async_trait;
use privarion_core::PrivarionError;
use std::sync::Mutex;

/// Result of executing a host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes privileged and unprivileged host commands.
///
/// Implementations must never pass `args` through a shell — no `sh -c`
/// interpolation of caller-controlled strings, ever.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute an unprivileged command with argv-style arguments.
    async fn exec(&self, cmd: &str, args: &[String]) -> Result<CommandOutput, PrivarionError>;

    /// Execute a privileged command (e.g. via a configured `sudo`/`authopen`
    /// front-end). Same argv semantics as [`exec`](Self::exec).
    async fn exec_privileged(
        &self,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandOutput, PrivarionError>;
}

/// Executes host commands via `tokio::process::Command`.
///
/// Arguments are passed as a `Vec<String>` directly to `Command::args`; no
/// string is ever concatenated into a shell command line.
pub struct HostCommandExecutor {
    privileged_prefix: Vec<String>,
}

impl HostCommandExecutor {
    /// Create an executor that runs privileged commands as-is (suitable when
    /// the process already runs as root).
    #[must_use]
    pub fn new() -> Self {
        Self {
            privileged_prefix: Vec::new(),
        }
    }

    /// Create an executor that prefixes privileged commands with a wrapper,
    /// e.g. `["sudo", "-n"]`.
    #[must_use]
    pub fn with_privileged_prefix(prefix: Vec<String>) -> Self {
        Self {
            privileged_prefix: prefix,
        }
    }

    async fn run(cmd: &str, args: &[String]) -> Result<CommandOutput, PrivarionError> {
        let output = tokio::process::Command::new(cmd)
            .args(args)
            .output()
            .await
            .map_err(|e| PrivarionError::Io(format!("failed to spawn {cmd}: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

impl Default for HostCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for HostCommandExecutor {
    async fn exec(&self, cmd: &str, args: &[String]) -> Result<CommandOutput, PrivarionError> {
        Self::run(cmd, args).await
    }

    async fn exec_privileged(
        &self,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandOutput, PrivarionError> {
        if self.privileged_prefix.is_empty() {
            return Self::run(cmd, args).await;
        }
        let (head, rest) = self
            .privileged_prefix
            .split_first()
            .expect("checked non-empty above");
        let mut full_args: Vec<String> = rest.to_vec();
        full_args.push(cmd.to_string());
        full_args.extend_from_slice(args);
        Self::run(head, &full_args).await
    }
}

/// A single scripted invocation recorded by [`RecordingCommandExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub cmd: String,
    pub args: Vec<String>,
    pub privileged: bool,
}

/// Test double that never touches the host. Scripted responses are keyed by
/// `"{cmd} {args.join(' ')}"`; unscripted invocations return a default
/// successful empty output so tests only need to script the calls they care
/// about.
pub struct RecordingCommandExecutor {
    scripted: dashmap::DashMap<String, CommandOutput>,
    invocations: Mutex<Vec<RecordedInvocation>>,
}

impl RecordingCommandExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripted: dashmap::DashMap::new(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Script the response for a given `cmd`/`args` combination.
    pub fn script(&self, cmd: &str, args: &[&str], output: CommandOutput) {
        let key = Self::key(cmd, &args.iter().map(|s| (*s).to_string()).collect::<Vec<_>>());
        self.scripted.insert(key, output);
    }

    /// Return all recorded invocations in call order.
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().expect("invocations mutex poisoned").clone()
    }

    fn key(cmd: &str, args: &[String]) -> String {
        format!("{cmd} {}", args.join(" "))
    }

    async fn record(&self, cmd: &str, args: &[String], privileged: bool) -> CommandOutput {
        self.invocations
            .lock()
            .expect("invocations mutex poisoned")
            .push(RecordedInvocation {
                cmd: cmd.to_string(),
                args: args.to_vec(),
                privileged,
            });
        self.scripted
            .get(&Self::key(cmd, args))
            .map(|entry| entry.clone())
            .unwrap_or_else(|| CommandOutput::success(""))
    }
}

impl Default for RecordingCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for RecordingCommandExecutor {
    async fn exec(&self, cmd: &str, args: &[String]) -> Result<CommandOutput, PrivarionError> {
        Ok(self.record(cmd, args, false).await)
    }

    async fn exec_privileged(
        &self,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandOutput, PrivarionError> {
        Ok(self.record(cmd, args, true).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_executor_returns_default_on_unscripted_call() {
        let exec = RecordingCommandExecutor::new();
        let out = exec.exec("hostname", &[]).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "");
    }

    #[tokio::test]
    async fn recording_executor_returns_scripted_output() {
        let exec = RecordingCommandExecutor::new();
        exec.script("hostname", &[], CommandOutput::success("dev-1234\n"));
        let out = exec.exec("hostname", &[]).await.unwrap();
        assert_eq!(out.stdout, "dev-1234\n");
    }

    #[tokio::test]
    async fn recording_executor_tracks_invocations() {
        let exec = RecordingCommandExecutor::new();
        exec.exec("id", &["-u".to_string()]).await.unwrap();
        exec.exec_privileged("scutil", &["--set".to_string(), "HostName".to_string()])
            .await
            .unwrap();

        let calls = exec.invocations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].cmd, "id");
        assert!(!calls[0].privileged);
        assert_eq!(calls[1].cmd, "scutil");
        assert!(calls[1].privileged);
    }

    #[tokio::test]
    async fn host_executor_runs_true_and_false() {
        let exec = HostCommandExecutor::new();
        let out = exec.exec("true", &[]).await.unwrap();
        assert!(out.is_success());
        let out = exec.exec("false", &[]).await.unwrap();
        assert!(!out.is_success());
    }
}
