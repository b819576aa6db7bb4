//! Tunnel lifecycle supervisor.
//!
//! Owns the [`TunnelMonitor`] and reacts to its events: notifies systemd once
//! the tunnel is up, and on a lost connection runs the configured repair hook
//! and restarts monitoring after a delay.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::monitor::{MonitorError, TunnelMonitor, TunnelMonitorEvent};

/// Errors that end the supervisor loop.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub probe_address: Ipv4Addr,
    /// Tunnel interface name, used to label logs and metrics.
    pub interface: String,
    /// Shell command run after each lost connection.
    pub on_connection_lost: Option<String>,
    /// Delay between the repair hook and restarting the monitor.
    pub restart_delay: Duration,
}

pub struct Supervisor {
    monitor: TunnelMonitor,
    events: mpsc::UnboundedReceiver<TunnelMonitorEvent>,
    config: SupervisorConfig,
    ready_notified: bool,
    #[cfg(feature = "metrics")]
    metrics: tunnelwatch_core::metrics::MonitorMetrics,
}

impl Supervisor {
    pub fn new(
        monitor: TunnelMonitor,
        events: mpsc::UnboundedReceiver<TunnelMonitorEvent>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            monitor,
            events,
            config,
            ready_notified: false,
            #[cfg(feature = "metrics")]
            metrics: tunnelwatch_core::metrics::MonitorMetrics::new(),
        }
    }

    /// Start monitoring and handle events until shutdown is signalled or the
    /// monitor goes away. The monitor is shut down before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        info!(
            probe_address = %self.config.probe_address,
            interface = %self.config.interface,
            "Supervisor starting"
        );
        self.monitor.start(self.config.probe_address)?;

        let result = loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("Monitor event stream ended");
                        break Ok(());
                    };
                    match self.handle_event(event, &mut shutdown).await {
                        Ok(true) => {}
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Supervisor shutting down");
                    break Ok(());
                }
            }
        };

        self.monitor.shutdown().await;
        result
    }

    /// Returns `false` when shutdown was requested while handling the event.
    async fn handle_event(
        &mut self,
        event: TunnelMonitorEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, SupervisorError> {
        match event {
            TunnelMonitorEvent::ConnectionEstablished => {
                info!(interface = %self.config.interface, "Tunnel connection established");
                #[cfg(feature = "metrics")]
                self.metrics.record_established(&self.config.interface);
                if !self.ready_notified {
                    notify_ready();
                    self.ready_notified = true;
                }
                Ok(true)
            }
            TunnelMonitorEvent::NetworkReachabilityChanged(reachable) => {
                info!(reachable, "Network reachability changed");
                #[cfg(feature = "metrics")]
                self.metrics.record_reachability(reachable);
                Ok(true)
            }
            TunnelMonitorEvent::ConnectionLost => self.recover(shutdown).await,
        }
    }

    async fn recover(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<bool, SupervisorError> {
        let retry_attempt = self.monitor.snapshot().await?.retry_attempt;
        error!(
            interface = %self.config.interface,
            retry_attempt,
            "Tunnel connection lost"
        );
        #[cfg(feature = "metrics")]
        self.metrics
            .record_lost(&self.config.interface, retry_attempt);

        if let Some(command) = &self.config.on_connection_lost {
            run_hook(command, &self.config.interface, retry_attempt).await;
        }

        tokio::select! {
            () = tokio::time::sleep(self.config.restart_delay) => {}
            _ = shutdown.changed() => {
                info!("Supervisor shutting down during restart delay");
                return Ok(false);
            }
        }

        info!(probe_address = %self.config.probe_address, "Restarting tunnel monitor");
        self.monitor.start(self.config.probe_address)?;
        Ok(true)
    }
}

/// Run the repair hook through `sh -c`. Failures are logged only.
pub async fn run_hook(command: &str, interface: &str, retry_attempt: u32) -> bool {
    debug!(command, "Running connection-lost hook");
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("TUNNELWATCH_INTERFACE", interface)
        .env("TUNNELWATCH_RETRY_ATTEMPT", retry_attempt.to_string())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {
            debug!("Connection-lost hook succeeded");
            true
        }
        Ok(status) => {
            warn!(%status, command, "Connection-lost hook failed");
            false
        }
        Err(e) => {
            warn!(error = %e, command, "Failed to run connection-lost hook");
            false
        }
    }
}

#[cfg(unix)]
fn notify_ready() {
    // Unset $NOTIFY_SOCKET so hook processes cannot notify systemd.
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }
}

#[cfg(not(unix))]
const fn notify_ready() {}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hook_receives_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("hook.out");
        let command = format!(
            "echo \"$TUNNELWATCH_INTERFACE $TUNNELWATCH_RETRY_ATTEMPT\" > {}",
            out.display()
        );

        assert!(run_hook(&command, "wg0", 3).await);
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "wg0 3");
    }

    #[tokio::test]
    async fn failing_hook_is_reported() {
        assert!(!run_hook("exit 7", "wg0", 1).await);
    }
}
