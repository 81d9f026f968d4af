use privarion_audit::Severity;

use crate::event::SyscallEvent;

/// A field/value exception that suppresses an otherwise-matching rule.
#[derive(Debug, Clone)]
pub struct RuleException {
    pub name: String,
    pub fields: Vec<String>,
    pub values: Vec<String>,
    pub condition: Option<String>,
}

impl RuleException {
    /// Whether every `fields[i]`/`values[i]` pair matches `event`.
    #[must_use]
    pub fn matches(&self, event: &SyscallEvent) -> bool {
        if self.fields.len() != self.values.len() || self.fields.is_empty() {
            return false;
        }
        self.fields
            .iter()
            .zip(&self.values)
            .all(|(field, expected)| event.field(field).as_deref() == Some(expected.as_str()))
    }
}

/// Matches a Falco-style path/address pattern: a trailing `*` is a prefix
/// match, a leading `*` is a suffix match, anything else (including patterns
/// with wildcards in both positions) is an exact match.
#[must_use]
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        value.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        value.ends_with(suffix)
    } else {
        pattern == value
    }
}

fn list_permits(allowed: &[String], blocked: &[String], value: &str) -> bool {
    if !allowed.is_empty() && !allowed.iter().any(|p| pattern_matches(p, value)) {
        return false;
    }
    if blocked.iter().any(|p| pattern_matches(p, value)) {
        return false;
    }
    true
}

/// A Falco-style rule: which syscalls to watch, which processes/paths/network
/// destinations it applies to, and what to do when it matches.
#[derive(Debug, Clone)]
pub struct MonitoringRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub syscalls: Vec<String>,
    pub allowed_processes: Vec<String>,
    pub blocked_processes: Vec<String>,
    pub allowed_uids: Vec<u32>,
    pub blocked_uids: Vec<u32>,
    pub allowed_paths: Vec<String>,
    pub blocked_paths: Vec<String>,
    pub allowed_remote_ports: Vec<u16>,
    pub blocked_remote_ports: Vec<u16>,
    pub allowed_remote_addresses: Vec<String>,
    pub blocked_remote_addresses: Vec<String>,
    pub exceptions: Vec<RuleException>,
    pub priority: Severity,
    pub output_template: String,
}

impl MonitoringRule {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, syscalls: Vec<String>, priority: Severity) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            syscalls,
            allowed_processes: Vec::new(),
            blocked_processes: Vec::new(),
            allowed_uids: Vec::new(),
            blocked_uids: Vec::new(),
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
            allowed_remote_ports: Vec::new(),
            blocked_remote_ports: Vec::new(),
            allowed_remote_addresses: Vec::new(),
            blocked_remote_addresses: Vec::new(),
            exceptions: Vec::new(),
            output_template: String::new(),
        }
    }

    #[must_use]
    pub fn with_paths(mut self, allowed: Vec<String>, blocked: Vec<String>) -> Self {
        self.allowed_paths = allowed;
        self.blocked_paths = blocked;
        self
    }

    #[must_use]
    pub fn with_remote_ports(mut self, allowed: Vec<u16>, blocked: Vec<u16>) -> Self {
        self.allowed_remote_ports = allowed;
        self.blocked_remote_ports = blocked;
        self
    }

    #[must_use]
    pub fn with_remote_addresses(mut self, allowed: Vec<String>, blocked: Vec<String>) -> Self {
        self.allowed_remote_addresses = allowed;
        self.blocked_remote_addresses = blocked;
        self
    }

    #[must_use]
    pub fn with_exceptions(mut self, exceptions: Vec<RuleException>) -> Self {
        self.exceptions = exceptions;
        self
    }

    #[must_use]
    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = template.into();
        self
    }

    /// Whether `event` satisfies every filter this rule defines.
    #[must_use]
    pub fn matches(&self, event: &SyscallEvent) -> bool {
        if !self.enabled || !self.syscalls.iter().any(|s| s == &event.syscall) {
            return false;
        }

        let proc_allowed: Vec<String> = self.allowed_processes.clone();
        let proc_blocked: Vec<String> = self.blocked_processes.clone();
        if !list_permits(&proc_allowed, &proc_blocked, &event.proc_name) {
            return false;
        }

        if !self.allowed_uids.is_empty() && !self.allowed_uids.contains(&event.uid) {
            return false;
        }
        if self.blocked_uids.contains(&event.uid) {
            return false;
        }

        if !self.allowed_paths.is_empty() || !self.blocked_paths.is_empty() {
            match &event.file_path {
                Some(path) if list_permits(&self.allowed_paths, &self.blocked_paths, path) => {}
                _ => return false,
            }
        }

        if !self.allowed_remote_ports.is_empty()
            || !self.blocked_remote_ports.is_empty()
            || !self.allowed_remote_addresses.is_empty()
            || !self.blocked_remote_addresses.is_empty()
        {
            match &event.network_info {
                Some(net) => {
                    let port_str = net.remote_port.to_string();
                    let allowed_ports: Vec<String> = self.allowed_remote_ports.iter().map(u16::to_string).collect();
                    let blocked_ports: Vec<String> = self.blocked_remote_ports.iter().map(u16::to_string).collect();
                    if !list_permits(&allowed_ports, &blocked_ports, &port_str) {
                        return false;
                    }
                    if !list_permits(&self.allowed_remote_addresses, &self.blocked_remote_addresses, &net.remote_address) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        if self.exceptions.iter().any(|exc| exc.matches(event)) {
            return false;
        }

        true
    }

    /// Interpolate `%proc.name`, `%proc.pid`, `%evt.arg.uid`, `%evt.syscall`,
    /// `%file.path`, `%network.dest`, `%network.port`, `%network.proto` in
    /// `output_template` against `event`.
    #[must_use]
    pub fn render_output(&self, event: &SyscallEvent) -> String {
        let mut out = self.output_template.clone();
        out = out.replace("%proc.name", &event.proc_name);
        out = out.replace("%proc.pid", &event.pid.to_string());
        out = out.replace("%evt.arg.uid", &event.uid.to_string());
        out = out.replace("%evt.syscall", &event.syscall);
        out = out.replace("%file.path", event.file_path.as_deref().unwrap_or(""));
        if let Some(net) = &event.network_info {
            out = out.replace("%network.dest", &net.remote_address);
            out = out.replace("%network.port", &net.remote_port.to_string());
            out = out.replace("%network.proto", &net.protocol);
        } else {
            out = out.replace("%network.dest", "");
            out = out.replace("%network.port", "");
            out = out.replace("%network.proto", "");
        }
        out
    }
}

/// The union of syscalls referenced by enabled rules.
#[must_use]
pub fn enabled_syscalls(rules: &[MonitoringRule]) -> Vec<String> {
    let mut set = std::collections::HashSet::new();
    for rule in rules.iter().filter(|r| r.enabled) {
        set.extend(rule.syscalls.iter().cloned());
    }
    set.into_iter().collect()
}

/// Seeded rules covering privacy-sensitive network egress, privilege
/// escalation, sensitive-file access, and remote-access ports.
#[must_use]
pub fn default_rules() -> Vec<MonitoringRule> {
    vec![
        MonitoringRule::new(
            "privacy-violation-dns-http",
            "Privacy-sensitive network egress",
            vec!["connect".into(), "sendto".into()],
            Severity::Warning,
        )
        .with_remote_ports(vec![53, 80, 443], vec![])
        .with_output_template(
            "potential privacy violation: %proc.name (pid %proc.pid) connected to %network.dest:%network.port",
        ),
        MonitoringRule::new(
            "privilege-escalation",
            "Privilege escalation via setuid family",
            vec!["setuid".into(), "setgid".into(), "seteuid".into(), "setegid".into()],
            Severity::Critical,
        )
        .with_output_template("privilege escalation attempt: %proc.name (pid %proc.pid) called %evt.syscall"),
        MonitoringRule::new(
            "sensitive-file-access",
            "Sensitive file open/read/write",
            vec!["open".into(), "read".into(), "write".into()],
            Severity::Error,
        )
        .with_paths(vec!["/etc/*".into(), "*.pem".into(), "*.ssh_config".into()], vec![])
        .with_output_template("sensitive file access: %proc.name (pid %proc.pid) touched %file.path"),
        MonitoringRule::new(
            "network-sensitive-ports",
            "Remote-access protocol activity",
            vec!["connect".into()],
            Severity::Error,
        )
        .with_remote_ports(vec![22, 3389, 5900], vec![])
        .with_remote_addresses(vec![], vec!["127.0.0.1".into(), "::1".into(), "localhost".into()])
        .with_exceptions(vec![RuleException {
            name: "core-system-processes".into(),
            fields: vec!["proc.name".into()],
            values: vec!["launchd".into()],
            condition: None,
        }])
        .with_output_template(
            "remote-access port activity: %proc.name (pid %proc.pid) connected to %network.dest:%network.port",
        ),
    ]
}
