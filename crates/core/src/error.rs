use thiserror::Error;

/// Unified error taxonomy for the Privarion core engine.
///
/// Every fallible operation across the managers (ephemeral filesystem,
/// launcher, identity spoofing, permission policy, syscall monitoring, audit)
/// returns a variant of this enum. Variants carry the offending identifier
/// (space id, bundle id, grant id, rollback id, ...) wherever one is
/// available so callers can report actionable errors without re-deriving
/// context from a wrapped string.
#[derive(Debug, Error)]
pub enum PrivarionError {
    // -- Configuration --
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- Capacity / admission --
    #[error("maximum number of ephemeral spaces ({max}) exceeded")]
    MaxSpacesExceeded { max: usize },
    #[error("system overloaded: {in_flight} evaluations in flight (limit {limit})")]
    SystemOverloaded { in_flight: usize, limit: usize },
    #[error("denied: {0}")]
    Denied(String),
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    // -- Privilege --
    #[error("administrator privileges required for this operation")]
    AdminPrivilegesRequired,
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("write access not supported by this backend")]
    WriteNotSupported,

    // -- Not found --
    #[error("application not found: {0}")]
    ApplicationNotFound(String),
    #[error("application is not executable: {0}")]
    ApplicationNotExecutable(String),
    #[error("ephemeral space not found: {0}")]
    EphemeralSpaceNotFound(String),
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
    #[error("grant not found: {0}")]
    GrantNotFound(String),
    #[error("rollback point not found: {0}")]
    RollbackPointNotFound(String),
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    // -- Integrity --
    #[error("corrupted data: {0}")]
    CorruptedData(String),
    #[error("invalid rollback point: {0}")]
    InvalidRollbackPoint(String),
    #[error("rollback data corrupted while recovering from: {original}")]
    RollbackDataCorrupted { original: String },

    // -- External operation --
    #[error("snapshot creation failed: {0}")]
    SnapshotCreationFailed(String),
    #[error("snapshot deletion failed: {0}")]
    SnapshotDeletionFailed(String),
    #[error("mount operation failed: {0}")]
    MountOperationFailed(String),
    #[error("unmount operation failed: {0}")]
    UnmountOperationFailed(String),
    #[error("restore operation failed: {0}")]
    RestoreFailed(String),
    #[error("process launch failed: {0}")]
    ProcessLaunchFailed(String),
    #[error("process termination failed: {0}")]
    ProcessTerminationFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),

    // -- Validation --
    #[error("invalid identifier format: {0}")]
    InvalidIdentifierFormat(String),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("invalid bundle identifier: {0}")]
    InvalidBundleIdentifier(String),
    #[error("invalid service name: {0}")]
    InvalidServiceName(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    // -- Security --
    #[error("security violation: {0}")]
    SecurityViolation(String),
    #[error("unauthorized rollback attempt: {0}")]
    UnauthorizedRollbackAttempt(String),

    // -- I/O passthrough --
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for PrivarionError {
    fn from(e: std::io::Error) -> Self {
        PrivarionError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PrivarionError {
    fn from(e: serde_json::Error) -> Self {
        PrivarionError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PrivarionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_spaces_exceeded_message() {
        let err = PrivarionError::MaxSpacesExceeded { max: 5 };
        assert_eq!(err.to_string(), "maximum number of ephemeral spaces (5) exceeded");
    }

    #[test]
    fn ephemeral_space_not_found_carries_id() {
        let err = PrivarionError::EphemeralSpaceNotFound("space-1".into());
        assert!(err.to_string().contains("space-1"));
    }

    #[test]
    fn rollback_data_corrupted_wraps_original() {
        let err = PrivarionError::RollbackDataCorrupted {
            original: "hook update failed".into(),
        };
        assert!(err.to_string().contains("hook update failed"));
    }
}
