//! tunnelwatch daemon
//!
//! Monitors the health of a tunnel interface by probing an address reachable
//! only through it, and runs a repair hook when the connection is lost.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tunnelwatch_core::config::load_config;
use tunnelwatch_daemon::device::SysfsDevice;
use tunnelwatch_daemon::monitor::{TunnelMonitor, TunnelMonitorTimings};
use tunnelwatch_daemon::path::RouteTablePathObserver;
use tunnelwatch_daemon::probe::IcmpPinger;
use tunnelwatch_daemon::supervisor::{Supervisor, SupervisorConfig};

#[derive(Parser, Debug)]
#[command(name = "tunnelwatch-daemon")]
#[command(version, about = "tunnelwatch daemon - tunnel connection-health monitor")]
struct Args {
    /// Tunnel interface to monitor (e.g. "wg0")
    #[arg(long)]
    interface: Option<String>,

    /// Address reachable only through the tunnel, used for ICMP probes
    #[arg(long)]
    probe_address: Option<Ipv4Addr>,

    /// Configuration file, applied on top of the global settings file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TUNNELWATCH_LOG_JSON")]
    log_json: bool,

    /// Shell command run each time the connection is lost
    #[arg(long)]
    on_connection_lost: Option<String>,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "TUNNELWATCH_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if args.interface.is_some() {
        config.daemon.interface = args.interface;
    }
    if args.probe_address.is_some() {
        config.daemon.probe_address = args.probe_address;
    }
    if let Some(log_level) = args.log_level {
        config.daemon.log_level = log_level;
    }
    if args.on_connection_lost.is_some() {
        config.daemon.on_connection_lost = args.on_connection_lost;
    }

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let log_filter = format!("tunnelwatch_daemon={}", config.daemon.log_level);
    let _metrics_guard = tunnelwatch_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        metrics_endpoint,
    );

    let interface = config
        .daemon
        .interface
        .clone()
        .context("No tunnel interface configured (use --interface)")?;
    let probe_address = config
        .daemon
        .probe_address
        .context("No probe address configured (use --probe-address)")?;
    let timings = TunnelMonitorTimings::from(&config.monitor);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %interface,
        %probe_address,
        ?timings,
        "Starting tunnelwatch-daemon"
    );

    let path_observer = RouteTablePathObserver::new(
        Some(interface.clone()),
        Duration::from_millis(config.daemon.path_poll_interval_ms),
    );
    let (monitor, events) = TunnelMonitor::spawn(
        IcmpPinger::new(),
        SysfsDevice::new(interface.clone()),
        path_observer,
        timings,
    );

    let supervisor = Supervisor::new(
        monitor,
        events,
        SupervisorConfig {
            probe_address,
            interface,
            on_connection_lost: config.daemon.on_connection_lost,
            restart_delay: Duration::from_millis(config.daemon.restart_delay_ms),
        },
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = &mut supervisor_handle => {
            result??;
            info!("Supervisor exited");
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    supervisor_handle.await??;

    info!("Daemon stopped");
    Ok(())
}
