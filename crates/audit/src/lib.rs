pub mod event;
pub mod logger;
pub mod sink;

pub use event::{AuditEvent, NetworkContext, ProcessContext, Severity, UserContext};
pub use logger::{AuditLogger, AuditLoggerConfig, AuditStatistics, RotationPolicy};
pub use sink::{
    AuditSink, Destination, FileSink, MemorySink, NetworkSink, SyslogSink, SystemLogSink,
    UnsupportedDatabaseSink,
};
