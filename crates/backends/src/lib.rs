pub mod command;
pub mod hook;
pub mod permission_store;
pub mod snapshot;

pub use command::{CommandExecutor, CommandOutput, HostCommandExecutor, RecordingCommandExecutor};
pub use hook::{HookBackend, HostHookBackend, InstallStatus, NoopHookBackend, SyscallHookConfiguration, SystemInfoFake};
pub use permission_store::{
    AuthValue, HostPermissionStore, InMemoryPermissionStore, Permission, PermissionStore, ServiceId,
};
pub use snapshot::{HostSnapshotBackend, InMemorySnapshotBackend, SnapshotBackend};
