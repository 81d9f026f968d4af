use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info};

use crate::config::BackgroundConfig;
use crate::context::ApplicationContext;

/// Periodic maintenance tasks run on a single background task: grant expiry
/// sweeps, the permission store poll, and audit flush/rotation/retention all
/// tick independently on their own `select!` branch and never block each
/// other.
pub struct BackgroundScheduler {
    config: BackgroundConfig,
    ctx: Arc<ApplicationContext>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl BackgroundScheduler {
    #[must_use]
    pub fn new(ctx: Arc<ApplicationContext>) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let config = ctx.config.background.clone();
        (
            Self {
                config,
                ctx,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// Run until a shutdown signal arrives. Each tick's failure is logged,
    /// not propagated, so one misbehaving subsystem never stalls the others.
    pub async fn run(&mut self) {
        info!("background scheduler starting");

        let mut grant_cleanup = interval(self.config.grant_cleanup_interval());
        let mut permission_poll = interval(self.config.permission_poll_interval());
        let mut audit_flush = interval(self.config.audit_flush_interval());
        let mut audit_rotation = interval(self.config.audit_rotation_check_interval());
        let mut audit_cleanup = interval(self.config.audit_cleanup_interval());

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("background scheduler received shutdown signal");
                    break;
                }
                _ = grant_cleanup.tick(), if self.config.enable_grant_cleanup => {
                    match self.ctx.grants.sweep_once().await {
                        Ok(stats) => info!(removed = stats.removed_count, notified = stats.notifications_sent, "grant cleanup swept"),
                        Err(e) => error!(error = %e, "grant cleanup sweep failed"),
                    }
                }
                _ = permission_poll.tick(), if self.config.enable_permission_poll => {
                    if let Err(e) = self.ctx.permission_monitor.poll_once().await {
                        error!(error = %e, "permission monitor poll failed");
                    }
                }
                _ = audit_flush.tick(), if self.config.enable_audit_maintenance => {
                    self.ctx.audit.run_periodic_flush().await;
                }
                _ = audit_rotation.tick(), if self.config.enable_audit_maintenance => {
                    if let Err(e) = self.ctx.audit.run_time_rotation().await {
                        error!(error = %e, "audit time rotation failed");
                    }
                    if let Err(e) = self.ctx.audit.run_size_rotation_check().await {
                        error!(error = %e, "audit size rotation check failed");
                    }
                }
                _ = audit_cleanup.tick(), if self.config.enable_audit_maintenance => {
                    match self.ctx.audit.cleanup().await {
                        Ok(removed) => info!(removed, "audit retention cleanup ran"),
                        Err(e) => error!(error = %e, "audit retention cleanup failed"),
                    }
                }
            }
        }

        info!("background scheduler stopped");
    }
}
