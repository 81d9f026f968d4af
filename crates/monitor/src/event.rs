/// Network side-channel details for syscalls like `connect`/`sendto`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub remote_address: String,
    pub remote_port: u16,
    pub protocol: String,
}

/// A single intercepted syscall, as reported by a `HookBackend`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyscallEvent {
    pub syscall: String,
    pub pid: i32,
    pub proc_name: String,
    pub uid: u32,
    pub gid: u32,
    pub args: Vec<String>,
    pub ret: i64,
    pub file_path: Option<String>,
    pub network_info: Option<NetworkInfo>,
}

impl SyscallEvent {
    /// Look up a Falco-style field reference used by exceptions
    /// (`proc.name`, `proc.pid`, `evt.uid`).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "proc.name" => Some(self.proc_name.clone()),
            "proc.pid" => Some(self.pid.to_string()),
            "evt.uid" => Some(self.uid.to_string()),
            _ => None,
        }
    }
}
