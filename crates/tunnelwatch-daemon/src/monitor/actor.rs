//! Monitor actor: the single writer of all monitor state.
//!
//! Commands from the handle, path updates, probe replies and connectivity
//! timer ticks are multiplexed in one `select!` loop and processed strictly in
//! arrival order. Path and probe receivers are dropped whenever their source
//! is detached, so nothing queued before a `stop` or restart can reach the
//! state afterwards.

use std::net::{IpAddr, Ipv4Addr};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::events::{MonitorSnapshot, TunnelMonitorEvent};
use super::state::{ConnectionEvaluation, ConnectionState, TunnelMonitorState};
use super::timer::ConnectivityTimer;
use super::timings::TunnelMonitorTimings;
use crate::device::TunnelDeviceInfo;
use crate::path::{DefaultPathObserver, PathStatus};
use crate::probe::{PingReply, Pinger, PingerEvent};

/// Requests sent from [`TunnelMonitor`](super::TunnelMonitor) to the actor.
#[derive(Debug)]
pub(super) enum Command {
    Start(Ipv4Addr),
    Stop(oneshot::Sender<()>),
    Sleep,
    Wake,
    Snapshot(oneshot::Sender<MonitorSnapshot>),
}

pub(super) struct MonitorActor<P, D, O> {
    pinger: P,
    device: D,
    path_observer: O,
    state: TunnelMonitorState,
    probe_address: Option<Ipv4Addr>,
    timer: ConnectivityTimer,
    path_updates: Option<mpsc::UnboundedReceiver<PathStatus>>,
    pinger_events: Option<mpsc::UnboundedReceiver<PingerEvent>>,
    events: mpsc::UnboundedSender<TunnelMonitorEvent>,
}

impl<P, D, O> MonitorActor<P, D, O>
where
    P: Pinger,
    D: TunnelDeviceInfo,
    O: DefaultPathObserver,
{
    pub(super) fn new(
        pinger: P,
        device: D,
        path_observer: O,
        timings: TunnelMonitorTimings,
        events: mpsc::UnboundedSender<TunnelMonitorEvent>,
    ) -> Self {
        Self {
            pinger,
            device,
            path_observer,
            state: TunnelMonitorState::new(timings, Instant::now()),
            probe_address: None,
            timer: ConnectivityTimer::new(timings.connectivity_check_interval),
            path_updates: None,
            pinger_events: None,
            events,
        }
    }

    /// Process events until every handle is gone, then stop.
    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                update = recv_attached(&mut self.path_updates) => match update {
                    Some(status) => self.handle_path_update(status),
                    None => self.path_updates = None,
                },
                event = recv_attached(&mut self.pinger_events) => match event {
                    Some(event) => self.handle_pinger_event(event),
                    None => self.pinger_events = None,
                },
                _ = self.timer.tick() => self.check_connectivity(),
            }
        }

        self.stop();
        debug!("Tunnel monitor actor exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(address) => self.start(address),
            Command::Stop(ack) => {
                self.stop();
                let _ = ack.send(());
            }
            Command::Sleep => self.on_sleep(),
            Command::Wake => self.on_wake(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn start(&mut self, probe_address: Ipv4Addr) {
        if self.state.connection_state != ConnectionState::Stopped {
            debug!("Restarting tunnel monitor");
            self.stop_path_observer();
            self.stop_monitoring(false);
        }

        info!(%probe_address, retry_attempt = self.state.retry_attempt, "Starting tunnel monitor");
        self.probe_address = Some(probe_address);
        self.state.connection_state = ConnectionState::PendingStart;
        self.start_path_observer();

        if let Some(status) = self.path_observer.current_path_status() {
            self.handle_path_update(status);
        }
    }

    fn stop(&mut self) {
        if self.state.connection_state == ConnectionState::Stopped {
            return;
        }

        info!("Stopping tunnel monitor");
        self.stop_path_observer();
        self.stop_monitoring(true);
        self.probe_address = None;
        self.state.connection_state = ConnectionState::Stopped;
    }

    fn on_sleep(&mut self) {
        debug!("Suspending tunnel monitor");
        self.timer.stop();
        self.stop_path_observer();
    }

    fn on_wake(&mut self) {
        match self.state.connection_state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!("Resuming connectivity checks");
                self.timer.start();
                self.start_path_observer();
            }
            ConnectionState::WaitingConnectivity | ConnectionState::PendingStart => {
                debug!("Resuming path observation");
                self.start_path_observer();
            }
            ConnectionState::Stopped | ConnectionState::Recovering => {}
        }
    }

    fn handle_path_update(&mut self, status: PathStatus) {
        let reachable = status.is_reachable();
        match (self.state.connection_state, reachable) {
            (ConnectionState::PendingStart | ConnectionState::WaitingConnectivity, true) => {
                info!(?status, "Network is reachable, starting monitoring");
                self.emit(TunnelMonitorEvent::NetworkReachabilityChanged(true));
                self.start_monitoring();
            }
            (ConnectionState::PendingStart, false) => {
                info!(?status, "Waiting for network connectivity");
                self.timer.stop();
                self.state.connection_state = ConnectionState::WaitingConnectivity;
                self.emit(TunnelMonitorEvent::NetworkReachabilityChanged(false));
            }
            (ConnectionState::Connecting | ConnectionState::Connected, false) => {
                info!(?status, "Network is unreachable, pausing monitoring");
                self.stop_monitoring(true);
                self.state.connection_state = ConnectionState::WaitingConnectivity;
                self.emit(TunnelMonitorEvent::NetworkReachabilityChanged(false));
            }
            _ => {}
        }
    }

    fn start_monitoring(&mut self) {
        let interface = self.device.interface_name();
        match self.pinger.open_socket(interface.as_deref()) {
            Ok(events) => self.pinger_events = Some(events),
            Err(e) => {
                warn!(error = %e, ?interface, "Failed to open probe socket");
                self.state.connection_state = ConnectionState::PendingStart;
                self.timer.start_delayed();
                return;
            }
        }

        self.state.connection_state = ConnectionState::Connecting;
        self.state.timeout_reference = Instant::now();
        self.timer.start();
    }

    fn stop_monitoring(&mut self, reset_retry_attempts: bool) {
        self.timer.stop();
        self.pinger.close_socket();
        self.pinger_events = None;
        self.state.reset(reset_retry_attempts);
    }

    fn start_path_observer(&mut self) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        self.path_observer.start(updates_tx);
        self.path_updates = Some(updates_rx);
    }

    fn stop_path_observer(&mut self) {
        self.path_observer.stop();
        self.path_updates = None;
    }

    fn check_connectivity(&mut self) {
        // Only armed in PendingStart after the probe socket failed to open.
        if self.state.connection_state == ConnectionState::PendingStart {
            debug!("Retrying probe socket open");
            self.start_monitoring();
            return;
        }
        if !self.state.connection_state.is_probing() {
            return;
        }

        let now = Instant::now();
        match self.device.stats() {
            Ok(stats) if stats.is_reset_from(&self.state.net_stats) => {
                debug!(
                    bytes_received = stats.bytes_received,
                    bytes_sent = stats.bytes_sent,
                    "Tunnel counters reset, rebaselining"
                );
                self.state.net_stats = stats;
                return;
            }
            Ok(stats) => self.state.update_net_stats(stats, now),
            // Traffic stamps go stale, so the ping timeout still applies.
            Err(e) => warn!(error = %e, "Failed to read tunnel device stats"),
        }

        let ping_timeout = self.state.ping_timeout();
        let evaluation = self.state.evaluate_connection(now, ping_timeout);
        if evaluation != ConnectionEvaluation::Ok {
            trace!(?evaluation, state = ?self.state.connection_state, "Connectivity check");
        }

        match evaluation {
            ConnectionEvaluation::Ok => {}
            ConnectionEvaluation::PingTimeout => self.start_connection_recovery(),
            ConnectionEvaluation::SuspendHeartbeat => {
                debug!("No traffic, suspending heartbeat");
                self.state.is_heartbeat_suspended = true;
            }
            ConnectionEvaluation::SendInitialPing
            | ConnectionEvaluation::SendNextPing
            | ConnectionEvaluation::SendHeartbeatPing
            | ConnectionEvaluation::RetryHeartbeatPing
            | ConnectionEvaluation::InboundTrafficTimeout
            | ConnectionEvaluation::TrafficTimeout => {
                if self.state.is_heartbeat_suspended {
                    debug!(?evaluation, "Resuming heartbeat");
                    self.state.is_heartbeat_suspended = false;
                    self.state.timeout_reference = now;
                }
                self.send_ping(now);
            }
        }
    }

    fn send_ping(&mut self, now: Instant) {
        let Some(address) = self.probe_address else {
            return;
        };
        match self.pinger.send(address) {
            Ok(result) => {
                trace!(
                    sequence_number = result.sequence_number,
                    bytes_sent = result.bytes_sent,
                    probe_address = %address,
                    "Sent ping"
                );
                self.state.update_ping_stats(result, now);
            }
            Err(e) => warn!(error = %e, probe_address = %address, "Failed to send ping"),
        }
    }

    fn start_connection_recovery(&mut self) {
        self.stop_path_observer();
        self.stop_monitoring(false);
        self.state.increment_retry_attempt();
        self.probe_address = None;
        self.state.connection_state = ConnectionState::Recovering;
        warn!(retry_attempt = self.state.retry_attempt, "Connection lost, recovering");
        self.emit(TunnelMonitorEvent::ConnectionLost);
    }

    fn handle_pinger_event(&mut self, event: PingerEvent) {
        match event {
            PingerEvent::Reply(reply) => self.handle_ping_reply(reply),
            PingerEvent::Error(e) => debug!(error = %e, "Failed to read ping reply"),
        }
    }

    fn handle_ping_reply(&mut self, reply: PingReply) {
        if !self.state.connection_state.is_probing() {
            return;
        }
        if self.probe_address.map(IpAddr::V4) != Some(reply.sender) {
            debug!(sender = %reply.sender, "Ignoring reply from unexpected sender");
            return;
        }

        let now = Instant::now();
        let Some(sent_at) = self.state.set_ping_reply_received(reply.sequence_number, now) else {
            debug!(
                sequence_number = reply.sequence_number,
                "Ignoring reply with unknown sequence number"
            );
            return;
        };
        debug!(
            sequence_number = reply.sequence_number,
            rtt_ms = now.saturating_duration_since(sent_at).as_millis(),
            "Received ping reply"
        );
        self.state.is_heartbeat_suspended = false;

        if self.state.connection_state == ConnectionState::Connecting {
            info!(retry_attempt = self.state.retry_attempt, "Connection established");
            self.state.connection_state = ConnectionState::Connected;
            self.state.retry_attempt = 0;
            self.emit(TunnelMonitorEvent::ConnectionEstablished);
        }
    }

    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            connection_state: self.state.connection_state,
            retry_attempt: self.state.retry_attempt,
            is_heartbeat_suspended: self.state.is_heartbeat_suspended,
            net_stats: self.state.net_stats,
            pending_requests: self.state.ping_stats.requests.len(),
            probe_address: self.probe_address,
        }
    }

    fn emit(&self, event: TunnelMonitorEvent) {
        if self.events.send(event).is_err() {
            debug!(?event, "Monitor event receiver dropped");
        }
    }
}

/// Receive from an attached source, or wait forever while detached.
async fn recv_attached<T>(receiver: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
