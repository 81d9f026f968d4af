use async_trait::async_trait;
use privarion_core::PrivarionError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::event::{AuditEvent, Severity};

/// Where an [`AuditLogger`](crate::logger::AuditLogger) delivers flushed
/// batches. Mirrors the destination kinds named in the persisted state
/// layout: `File`, `System`, `Syslog`, `Network(url)`, `Database`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    System,
    Syslog,
    Network(String),
    Database(String),
}

/// Delivers a batch of audit events to one destination.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Human-readable name, used in error messages and logs.
    fn name(&self) -> &str;

    /// Deliver events in order. Implementations must preserve append-order
    /// within a single call.
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), PrivarionError>;

    /// Lets [`crate::logger::AuditLogger`] recover the concrete sink behind
    /// a `dyn AuditSink` (e.g. to locate the real [`FileSink`] instance(s)
    /// passed into its `sinks` list, rather than keeping a second,
    /// disconnected copy).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Appends JSON-lines to a rotating log file under a directory with mode
/// 0700; files are created with mode 0600. The header line (a single
/// `AuditEvent` marking file creation) is written by
/// [`crate::logger::AuditLogger`] against this same instance, once at
/// construction and again after every rotation — the sink itself only ever
/// appends whatever batch it's handed.
pub struct FileSink {
    path: tokio::sync::Mutex<PathBuf>,
}

impl FileSink {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: tokio::sync::Mutex::new(path),
        }
    }

    /// Point this sink at a new file, used by the logger's rotation handler.
    pub async fn set_path(&self, path: PathBuf) {
        *self.path.lock().await = path;
    }

    async fn open(path: &Path) -> Result<tokio::fs::File, PrivarionError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).await?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(file)
    }
}

#[async_trait]
impl AuditSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), PrivarionError> {
        let path = self.path.lock().await.clone();
        let mut file = Self::open(&path).await?;
        let mut buf = String::new();
        for event in events {
            buf.push_str(&event.to_json_line()?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Emits critical-severity events immediately through `tracing`, standing in
/// for the host's system logger (e.g. `os_log`/`syslog`). Also used as the
/// generic "System" destination for batched delivery.
pub struct SystemLogSink;

#[async_trait]
impl AuditSink for SystemLogSink {
    fn name(&self) -> &str {
        "system"
    }

    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), PrivarionError> {
        for event in events {
            match event.severity {
                Severity::Emergency | Severity::Alert | Severity::Critical => {
                    error!(
                        event_id = %event.id,
                        source = %event.source,
                        action = %event.action,
                        outcome = %event.outcome,
                        "{}",
                        event.event_type
                    );
                }
                Severity::Error | Severity::Warning => {
                    warn!(
                        event_id = %event.id,
                        source = %event.source,
                        action = %event.action,
                        "{}",
                        event.event_type
                    );
                }
                Severity::Notice | Severity::Info | Severity::Debug => {
                    tracing::debug!(
                        event_id = %event.id,
                        source = %event.source,
                        action = %event.action,
                        "{}",
                        event.event_type
                    );
                }
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Forwards events as a JSON array to a syslog-compatible HTTP collector.
/// Privarion never links a native syslog C binding; this sink exists so the
/// `Syslog` destination kind has a concrete, portable implementation.
pub struct SyslogSink {
    collector_url: String,
    client: reqwest::Client,
}

impl SyslogSink {
    #[must_use]
    pub fn new(collector_url: impl Into<String>) -> Self {
        Self {
            collector_url: collector_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AuditSink for SyslogSink {
    fn name(&self) -> &str {
        "syslog"
    }

    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), PrivarionError> {
        self.client
            .post(&self.collector_url)
            .json(events)
            .send()
            .await
            .map_err(|e| PrivarionError::WriteFailed(format!("syslog sink: {e}")))?
            .error_for_status()
            .map_err(|e| PrivarionError::WriteFailed(format!("syslog sink: {e}")))?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Posts a batch as JSON to a configured network endpoint.
pub struct NetworkSink {
    url: String,
    client: reqwest::Client,
}

impl NetworkSink {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AuditSink for NetworkSink {
    fn name(&self) -> &str {
        "network"
    }

    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), PrivarionError> {
        self.client
            .post(&self.url)
            .json(events)
            .send()
            .await
            .map_err(|e| PrivarionError::WriteFailed(format!("network sink: {e}")))?
            .error_for_status()
            .map_err(|e| PrivarionError::WriteFailed(format!("network sink: {e}")))?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Documents the `Database` destination's contract without shipping a real
/// database driver; a deployment wires in a concrete `AuditSink` backed by
/// whatever store it already runs (Postgres, `SQLite`, ...).
pub struct UnsupportedDatabaseSink {
    target: String,
}

impl UnsupportedDatabaseSink {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl AuditSink for UnsupportedDatabaseSink {
    fn name(&self) -> &str {
        "database"
    }

    async fn write_batch(&self, _events: &[AuditEvent]) -> Result<(), PrivarionError> {
        tracing::warn!(target = %self.target, "database destination has no driver compiled in");
        Err(PrivarionError::WriteNotSupported)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// In-memory sink used by tests and as the implicit destination when no
/// configured destination is reachable; also serves as a dead-letter
/// landing pad so a failing sink never drops events.
pub struct MemorySink {
    events: parking_lot::RwLock<Vec<AuditEvent>>,
    write_count: AtomicU64,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: parking_lot::RwLock::new(Vec::new()),
            write_count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, events: &[AuditEvent]) -> Result<(), PrivarionError> {
        self.events.write().extend_from_slice(events);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
