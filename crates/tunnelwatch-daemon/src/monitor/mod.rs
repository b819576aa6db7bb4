//! Tunnel connection health monitor.
//!
//! Watches a tunnel by probing an address reachable only through it and by
//! tracking the interface byte counters. Reports [`TunnelMonitorEvent`]s to
//! its owner, which is responsible for rebuilding the tunnel on
//! [`TunnelMonitorEvent::ConnectionLost`].
//!
//! All state lives in a single actor task; [`TunnelMonitor`] is the handle
//! used to drive it.

mod actor;
mod error;
mod events;
mod state;
mod timer;
mod timings;

pub use error::MonitorError;
pub use events::{MonitorSnapshot, TunnelMonitorEvent};
pub use state::{ConnectionEvaluation, ConnectionState, PingStats, TunnelMonitorState};
pub use timings::TunnelMonitorTimings;

use std::net::Ipv4Addr;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::device::TunnelDeviceInfo;
use crate::path::DefaultPathObserver;
use crate::probe::Pinger;
use actor::{Command, MonitorActor};

/// Handle to a running monitor actor.
///
/// Dropping the handle stops the monitor; [`TunnelMonitor::shutdown`] does the
/// same and waits for the actor to finish.
pub struct TunnelMonitor {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl TunnelMonitor {
    /// Spawn the monitor actor on the current tokio runtime. The monitor
    /// starts in [`ConnectionState::Stopped`].
    pub fn spawn<P, D, O>(
        pinger: P,
        device: D,
        path_observer: O,
        timings: TunnelMonitorTimings,
    ) -> (Self, mpsc::UnboundedReceiver<TunnelMonitorEvent>)
    where
        P: Pinger + 'static,
        D: TunnelDeviceInfo + 'static,
        O: DefaultPathObserver + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let actor = MonitorActor::new(pinger, device, path_observer, timings, events_tx);
        let task = tokio::spawn(actor.run(commands_rx));

        (
            Self {
                commands: commands_tx,
                task,
            },
            events_rx,
        )
    }

    /// Start (or restart) monitoring with the given in-tunnel probe address.
    /// A restart keeps the retry attempt counter.
    pub fn start(&self, probe_address: Ipv4Addr) -> Result<(), MonitorError> {
        self.send(Command::Start(probe_address))
    }

    /// Stop monitoring. Returns once the actor has detached every source, so
    /// no earlier tick or reply can affect the state afterwards.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Stop(ack_tx))?;
        ack_rx.await.map_err(|_| MonitorError::ActorStopped)
    }

    /// The device is about to sleep.
    pub fn on_sleep(&self) -> Result<(), MonitorError> {
        self.send(Command::Sleep)
    }

    /// The device woke up.
    pub fn on_wake(&self) -> Result<(), MonitorError> {
        self.send(Command::Wake)
    }

    pub async fn snapshot(&self) -> Result<MonitorSnapshot, MonitorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| MonitorError::ActorStopped)
    }

    /// Stop the monitor and wait for the actor task to exit.
    pub async fn shutdown(self) {
        let Self { commands, task } = self;
        drop(commands);
        if let Err(e) = task.await {
            warn!(error = %e, "Tunnel monitor task failed");
        }
    }

    fn send(&self, command: Command) -> Result<(), MonitorError> {
        self.commands
            .send(command)
            .map_err(|_| MonitorError::ActorStopped)
    }
}
