//! In-memory collaborators for driving the monitor in tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use tunnelwatch_daemon::device::{DeviceError, NetStats, TunnelDeviceInfo};
use tunnelwatch_daemon::monitor::{MonitorSnapshot, TunnelMonitor, TunnelMonitorEvent};
use tunnelwatch_daemon::path::{DefaultPathObserver, PathStatus};
use tunnelwatch_daemon::probe::{PingReply, PingSendResult, Pinger, PingerError, PingerEvent};

pub const PROBE_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 64, 0, 1);
pub const INTERFACE: &str = "wg0";

/// Tunnel device whose counters are set by the test.
#[derive(Clone, Default)]
pub struct FakeDevice {
    stats: Arc<Mutex<NetStats>>,
    unavailable: Arc<AtomicBool>,
}

impl FakeDevice {
    pub fn set_stats(&self, stats: NetStats) {
        *self.stats.lock().unwrap() = stats;
    }

    /// Make `stats` fail as if the interface had disappeared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn add_traffic(&self, received: u64, sent: u64) {
        let mut stats = self.stats.lock().unwrap();
        stats.bytes_received += received;
        stats.bytes_sent += sent;
    }
}

impl TunnelDeviceInfo for FakeDevice {
    fn interface_name(&self) -> Option<String> {
        Some(INTERFACE.to_string())
    }

    fn stats(&self) -> Result<NetStats, DeviceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DeviceError::InterfaceUnavailable {
                interface: INTERFACE.to_string(),
            });
        }
        Ok(*self.stats.lock().unwrap())
    }
}

#[derive(Default)]
struct PingerInner {
    events: Option<mpsc::UnboundedSender<PingerEvent>>,
    sent: Vec<u16>,
    sequence_number: u16,
    auto_reply: bool,
    fail_open: bool,
    opened: usize,
    bound_interface: Option<String>,
}

/// Pinger that records requests and can answer them immediately. When linked
/// to a [`FakeDevice`], probes and replies count as tunnel traffic.
#[derive(Clone, Default)]
pub struct FakePinger {
    inner: Arc<Mutex<PingerInner>>,
    device: Option<FakeDevice>,
}

impl FakePinger {
    pub fn linked(device: &FakeDevice) -> Self {
        Self {
            inner: Arc::default(),
            device: Some(device.clone()),
        }
    }

    pub fn set_auto_reply(&self, auto_reply: bool) {
        self.inner.lock().unwrap().auto_reply = auto_reply;
    }

    pub fn set_fail_open(&self, fail_open: bool) {
        self.inner.lock().unwrap().fail_open = fail_open;
    }

    pub fn sent(&self) -> Vec<u16> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }

    pub fn last_sequence(&self) -> Option<u16> {
        self.inner.lock().unwrap().sent.last().copied()
    }

    pub fn opened(&self) -> usize {
        self.inner.lock().unwrap().opened
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().events.is_some()
    }

    pub fn bound_interface(&self) -> Option<String> {
        self.inner.lock().unwrap().bound_interface.clone()
    }

    /// Sender of the currently open socket, kept alive past `close_socket`.
    pub fn event_sender(&self) -> Option<mpsc::UnboundedSender<PingerEvent>> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Deliver a reply on the open socket. Returns `false` if none is open.
    pub fn reply_from(&self, sender: Ipv4Addr, sequence_number: u16) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(events) = inner.events.as_ref() else {
            return false;
        };
        events
            .send(PingerEvent::Reply(PingReply {
                sender: IpAddr::V4(sender),
                sequence_number,
            }))
            .is_ok()
    }

    pub fn reply(&self, sequence_number: u16) -> bool {
        self.reply_from(PROBE_ADDRESS, sequence_number)
    }
}

impl Pinger for FakePinger {
    fn open_socket(
        &mut self,
        interface_name: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<PingerEvent>, PingerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_open {
            return Err(PingerError::CreateSocket(std::io::Error::other(
                "interface not ready",
            )));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        inner.events = Some(events_tx);
        inner.opened += 1;
        inner.bound_interface = interface_name.map(str::to_string);
        Ok(events_rx)
    }

    fn close_socket(&mut self) {
        self.inner.lock().unwrap().events = None;
    }

    fn send(&mut self, address: Ipv4Addr) -> Result<PingSendResult, PingerError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(events) = inner.events.clone() else {
            return Err(PingerError::ClosedSocket);
        };
        inner.sequence_number = inner.sequence_number.wrapping_add(1);
        let sequence_number = inner.sequence_number;
        inner.sent.push(sequence_number);

        if let Some(device) = &self.device {
            device.add_traffic(0, 8);
        }
        if inner.auto_reply {
            if let Some(device) = &self.device {
                device.add_traffic(8, 0);
            }
            let _ = events.send(PingerEvent::Reply(PingReply {
                sender: IpAddr::V4(address),
                sequence_number,
            }));
        }

        Ok(PingSendResult {
            sequence_number,
            bytes_sent: 8,
        })
    }
}

#[derive(Default)]
struct PathInner {
    status: Option<PathStatus>,
    updates: Option<mpsc::UnboundedSender<PathStatus>>,
    starts: usize,
}

/// Path observer whose status is set by the test.
#[derive(Clone, Default)]
pub struct FakePathObserver {
    inner: Arc<Mutex<PathInner>>,
}

impl FakePathObserver {
    pub fn with_status(status: PathStatus) -> Self {
        let observer = Self::default();
        observer.inner.lock().unwrap().status = Some(status);
        observer
    }

    /// Change the status and notify the subscriber, if any.
    pub fn set_status(&self, status: PathStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = Some(status);
        if let Some(updates) = inner.updates.as_ref() {
            let _ = updates.send(status);
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().updates.is_some()
    }

    pub fn starts(&self) -> usize {
        self.inner.lock().unwrap().starts
    }
}

impl DefaultPathObserver for FakePathObserver {
    fn current_path_status(&self) -> Option<PathStatus> {
        self.inner.lock().unwrap().status
    }

    fn start(&mut self, updates: mpsc::UnboundedSender<PathStatus>) {
        let mut inner = self.inner.lock().unwrap();
        inner.updates = Some(updates);
        inner.starts += 1;
    }

    fn stop(&mut self) {
        self.inner.lock().unwrap().updates = None;
    }
}

/// Let the actor drain everything that is ready without crossing a tick.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn snapshot(monitor: &TunnelMonitor) -> MonitorSnapshot {
    monitor.snapshot().await.unwrap()
}

pub fn drain(events: &mut mpsc::UnboundedReceiver<TunnelMonitorEvent>) -> Vec<TunnelMonitorEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}
