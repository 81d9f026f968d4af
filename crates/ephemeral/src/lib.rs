pub mod manager;
pub mod registry;
pub mod snapshot;
pub mod space;

pub use manager::{EphemeralFileSystemManager, EphemeralFileSystemManagerConfig};
pub use registry::{SnapshotRegistry, SpaceRegistry};
pub use snapshot::{SnapshotMetadata, SnapshotSchedule, SnapshotStrategy};
pub use space::{EphemeralSpace, SpaceState};
