use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use privarion_core::PrivarionError;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::event::{AuditEvent, Severity};
use crate::sink::{AuditSink, FileSink, SystemLogSink};

/// When `File` rotation is time-based, which boundary triggers a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    None,
    Hourly,
    Daily,
    Weekly,
}

impl RotationPolicy {
    #[must_use]
    pub fn period(self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Hourly => Some(Duration::from_secs(3600)),
            Self::Daily => Some(Duration::from_secs(86_400)),
            Self::Weekly => Some(Duration::from_secs(7 * 86_400)),
        }
    }
}

/// Configuration for an [`AuditLogger`].
#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    /// Directory audit log files are written under.
    pub log_dir: PathBuf,
    /// Events with severity strictly more urgent than this floor are dropped
    /// at ingestion (lower ordinal == more urgent, per [`Severity`]'s `Ord`).
    pub severity_floor: Severity,
    /// Cache flush interval.
    pub flush_interval: Duration,
    /// Cache flushes early once this many entries accumulate.
    pub flush_size_threshold: usize,
    /// Time-based file rotation policy.
    pub rotation: RotationPolicy,
    /// How often the size-based rotation check runs.
    pub size_rotation_check_interval: Duration,
    /// Rotate the active file once it reaches this size.
    pub size_rotation_threshold_mb: u64,
    /// Delete rotated files older than this many days.
    pub retention_days: u64,
}

impl Default for AuditLoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("AuditLogs"),
            severity_floor: Severity::Debug,
            flush_interval: Duration::from_secs(5),
            flush_size_threshold: 100,
            rotation: RotationPolicy::Daily,
            size_rotation_check_interval: Duration::from_secs(300),
            size_rotation_threshold_mb: 100,
            retention_days: 30,
        }
    }
}

/// Point-in-time counters tracked by the logger, returned as a consistent
/// snapshot.
#[derive(Debug, Clone, Default)]
pub struct AuditStatistics {
    pub events_logged: u64,
    pub totals_by_type: HashMap<String, u64>,
    pub totals_by_severity: HashMap<String, u64>,
    pub last_event_time: Option<chrono::DateTime<Utc>>,
    pub uptime: Duration,
}

struct LoggerState {
    cache: Vec<AuditEvent>,
    stats: AuditStatistics,
    correlations: HashMap<Uuid, Vec<Uuid>>,
    active_file_path: PathBuf,
    file_opened_at: chrono::DateTime<Utc>,
}

/// Batches structured events, routes flushed batches to every configured
/// destination, and owns file rotation/retention for the `File` destination.
///
/// Single-writer actor: all mutation goes through one `Mutex`-guarded state
/// struct; I/O against sinks happens after the lock is released so a slow
/// destination never blocks ingestion.
pub struct AuditLogger {
    config: AuditLoggerConfig,
    sinks: Vec<Arc<dyn AuditSink>>,
    system_sink: Arc<SystemLogSink>,
    state: Mutex<LoggerState>,
    started_at: Instant,
}

impl AuditLogger {
    /// Builds the logger, pointing whichever of `sinks` is the real
    /// [`FileSink`] (if any) at the logger's own tracked active-file path —
    /// overriding whatever path the caller happened to construct it with —
    /// and writing the file-creation header line into it.
    pub async fn new(
        config: AuditLoggerConfig,
        sinks: Vec<Arc<dyn AuditSink>>,
    ) -> Result<Self, PrivarionError> {
        let active_file_path = Self::current_file_path(&config.log_dir);

        let logger = Self {
            config,
            sinks,
            system_sink: Arc::new(SystemLogSink),
            state: Mutex::new(LoggerState {
                cache: Vec::new(),
                stats: AuditStatistics::default(),
                correlations: HashMap::new(),
                active_file_path: active_file_path.clone(),
                file_opened_at: Utc::now(),
            }),
            started_at: Instant::now(),
        };
        logger.open_file(&active_file_path).await?;
        Ok(logger)
    }

    fn current_file_path(log_dir: &std::path::Path) -> PathBuf {
        let name = format!("audit_{}.log", Utc::now().format("%Y%m%d_%H%M%S"));
        log_dir.join(name)
    }

    /// Finds the real [`FileSink`] instance(s) in `self.sinks` (there is
    /// normally at most one) by downcasting, rather than keeping a second,
    /// disconnected copy, retargets each at `path`, and writes a single
    /// marker event into it — called once at construction and again after
    /// every rotation, so the sink's path and `LoggerState::active_file_path`
    /// never drift apart.
    async fn open_file(&self, path: &std::path::Path) -> Result<(), PrivarionError> {
        let header = AuditEvent::new("audit_log", "file_opened", Severity::Info, "success")
            .with_event_type("file_header");
        for sink in &self.sinks {
            if let Some(file_sink) = sink.as_any().downcast_ref::<FileSink>() {
                file_sink.set_path(path.to_path_buf()).await;
                file_sink.write_batch(std::slice::from_ref(&header)).await?;
            }
        }
        Ok(())
    }

    /// Ingest one event. Applies the severity floor, updates statistics and
    /// the correlation map, and flushes immediately if the cache has reached
    /// [`AuditLoggerConfig::flush_size_threshold`]. Critical-and-above
    /// severities additionally emit through the system logger right away.
    pub async fn log_event(&self, event: AuditEvent) -> Result<(), PrivarionError> {
        if event.severity > self.config.severity_floor {
            return Ok(());
        }

        if event.severity <= Severity::Critical {
            self.system_sink
                .write_batch(std::slice::from_ref(&event))
                .await?;
        }

        let should_flush = {
            let mut state = self.state.lock().await;
            state.stats.events_logged += 1;
            *state
                .stats
                .totals_by_type
                .entry(event.event_type.clone())
                .or_insert(0) += 1;
            *state
                .stats
                .totals_by_severity
                .entry(event.severity.as_str().to_string())
                .or_insert(0) += 1;
            state.stats.last_event_time = Some(event.timestamp);

            if let Some(correlation_id) = event.correlation_id {
                state.correlations.entry(correlation_id).or_default().push(event.id);
            }

            state.cache.push(event);
            state.cache.len() >= self.config.flush_size_threshold
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain the cache and fan it out to every destination. Safe to call
    /// concurrently with [`log_event`](Self::log_event); at most one flush's
    /// worth of events is ever in flight per call.
    pub async fn flush(&self) -> Result<(), PrivarionError> {
        let batch = {
            let mut state = self.state.lock().await;
            if state.cache.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut state.cache)
        };

        for sink in &self.sinks {
            if let Err(e) = sink.write_batch(&batch).await {
                error!(sink = sink.name(), error = %e, "audit sink flush failed");
            }
        }
        Ok(())
    }

    /// Periodic flush tick, driven by the application's background
    /// scheduler at [`AuditLoggerConfig::flush_interval`].
    pub async fn run_periodic_flush(&self) {
        if let Err(e) = self.flush().await {
            error!(error = %e, "periodic audit flush failed");
        }
    }

    /// Rotation tick: opens a fresh file once the configured time-based
    /// period has elapsed since the active file was opened.
    pub async fn run_time_rotation(&self) -> Result<(), PrivarionError> {
        let Some(period) = self.config.rotation.period() else {
            return Ok(());
        };
        let mut state = self.state.lock().await;
        let elapsed = Utc::now() - state.file_opened_at;
        if elapsed.to_std().unwrap_or(Duration::ZERO) < period {
            return Ok(());
        }
        self.rotate_locked(&mut state).await
    }

    /// Size-based rotation tick, driven every
    /// [`AuditLoggerConfig::size_rotation_check_interval`].
    pub async fn run_size_rotation_check(&self) -> Result<(), PrivarionError> {
        let mut state = self.state.lock().await;
        let size = tokio::fs::metadata(&state.active_file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size < self.config.size_rotation_threshold_mb * 1024 * 1024 {
            return Ok(());
        }
        self.rotate_locked(&mut state).await
    }

    async fn rotate_locked(&self, state: &mut LoggerState) -> Result<(), PrivarionError> {
        let new_path = Self::current_file_path(&self.config.log_dir);
        info!(old = %state.active_file_path.display(), new = %new_path.display(), "rotating audit log file");
        self.open_file(&new_path).await?;
        state.active_file_path = new_path;
        state.file_opened_at = Utc::now();
        Ok(())
    }

    /// Delete rotated files under the log directory older than
    /// [`AuditLoggerConfig::retention_days`]. Returns the number removed.
    pub async fn cleanup(&self) -> Result<u64, PrivarionError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days as i64);
        let mut removed = 0u64;
        let mut entries = match tokio::fs::read_dir(&self.config.log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let modified: chrono::DateTime<Utc> = metadata.modified()?.into();
            if modified < cutoff {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Snapshot of the current statistics, with `uptime` computed as time
    /// since this logger was constructed.
    pub async fn statistics(&self) -> AuditStatistics {
        let mut stats = self.state.lock().await.stats.clone();
        stats.uptime = self.started_at.elapsed();
        stats
    }

    /// Event IDs sharing the given correlation id, in arrival order.
    pub async fn correlated_events(&self, correlation_id: Uuid) -> Vec<Uuid> {
        self.state
            .lock()
            .await
            .correlations
            .get(&correlation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drain and flush any remaining cached events. Called during
    /// application shutdown before timers are cancelled.
    pub async fn shutdown(&self) -> Result<(), PrivarionError> {
        self.flush().await
    }
}
