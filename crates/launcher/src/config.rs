use std::collections::HashMap;
use std::path::PathBuf;

/// Per-launch knobs. `max_exec_time_seconds = 0` disables the timeout.
#[derive(Debug, Clone)]
pub struct LaunchConfiguration {
    pub inherit_env: bool,
    pub custom_env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub redirect_output: bool,
    pub enable_resource_monitoring: bool,
    pub max_exec_time_seconds: u32,
    pub kill_on_parent_exit: bool,
}

impl Default for LaunchConfiguration {
    fn default() -> Self {
        Self {
            inherit_env: true,
            custom_env: HashMap::new(),
            working_dir: None,
            redirect_output: true,
            enable_resource_monitoring: false,
            max_exec_time_seconds: 0,
            kill_on_parent_exit: true,
        }
    }
}
