use serde::{Deserialize, Serialize};

/// The closed set of identity-bearing values Privarion knows how to capture,
/// spoof, and restore.
///
/// This set is intentionally closed: adding a new kind of identity requires
/// touching every manager that switches on it (capture, spoof, validate,
/// restore), so it is kept as a flat enum rather than an open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityType {
    MacAddress,
    Hostname,
    SerialNumber,
    DiskUuid,
    NetworkInterface,
    SystemVersion,
    KernelVersion,
    UserId,
    GroupId,
    Username,
    HomeDirectory,
    ProcessId,
    ParentProcessId,
    Architecture,
    VolumeUuid,
    BootVolumeUuid,
}

impl IdentityType {
    /// All sixteen identity types, in a stable order.
    pub const ALL: [IdentityType; 16] = [
        IdentityType::MacAddress,
        IdentityType::Hostname,
        IdentityType::SerialNumber,
        IdentityType::DiskUuid,
        IdentityType::NetworkInterface,
        IdentityType::SystemVersion,
        IdentityType::KernelVersion,
        IdentityType::UserId,
        IdentityType::GroupId,
        IdentityType::Username,
        IdentityType::HomeDirectory,
        IdentityType::ProcessId,
        IdentityType::ParentProcessId,
        IdentityType::Architecture,
        IdentityType::VolumeUuid,
        IdentityType::BootVolumeUuid,
    ];

    /// Whether this identity can be virtualized purely through the
    /// `HookBackend`'s fake-data configuration, without touching host-wide
    /// state.
    #[must_use]
    pub fn is_virtualizable(self) -> bool {
        matches!(
            self,
            IdentityType::Hostname
                | IdentityType::SystemVersion
                | IdentityType::KernelVersion
                | IdentityType::UserId
                | IdentityType::GroupId
                | IdentityType::Architecture
        )
    }

    /// Whether a persistent (host-wide) spoof of this identity is meaningful
    /// via a privileged `CommandExecutor` call, in addition to (or instead
    /// of) a hook.
    #[must_use]
    pub fn supports_persistent_spoof(self) -> bool {
        matches!(self, IdentityType::MacAddress | IdentityType::Hostname)
    }

    /// Identities that are only ever logged about, never actually modified.
    /// Callers get this reported explicitly and deterministically as a
    /// skipped target rather than a silent no-op (see `DESIGN.md`).
    #[must_use]
    pub fn is_unsupported_spoof_target(self) -> bool {
        matches!(
            self,
            IdentityType::Username | IdentityType::HomeDirectory | IdentityType::ProcessId
        )
    }

    /// Stable lowercase-snake-case name, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityType::MacAddress => "mac_address",
            IdentityType::Hostname => "hostname",
            IdentityType::SerialNumber => "serial_number",
            IdentityType::DiskUuid => "disk_uuid",
            IdentityType::NetworkInterface => "network_interface",
            IdentityType::SystemVersion => "system_version",
            IdentityType::KernelVersion => "kernel_version",
            IdentityType::UserId => "user_id",
            IdentityType::GroupId => "group_id",
            IdentityType::Username => "username",
            IdentityType::HomeDirectory => "home_directory",
            IdentityType::ProcessId => "process_id",
            IdentityType::ParentProcessId => "parent_process_id",
            IdentityType::Architecture => "architecture",
            IdentityType::VolumeUuid => "volume_uuid",
            IdentityType::BootVolumeUuid => "boot_volume_uuid",
        }
    }
}

impl std::fmt::Display for IdentityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
