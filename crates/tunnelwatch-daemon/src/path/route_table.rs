//! Default path observer that polls the Linux IPv4 routing table.
//!
//! The path is considered satisfied while an up default route exists on an
//! interface other than the tunnel itself. Full-tunnel VPNs install their own
//! default route, which says nothing about the physical network.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DefaultPathObserver, PathStatus};

const PROC_NET_ROUTE: &str = "/proc/net/route";
const RTF_UP: u32 = 0x0001;

/// Polls `/proc/net/route` and reports changes of the default path.
pub struct RouteTablePathObserver {
    route_file: PathBuf,
    tunnel_interface: Option<String>,
    poll_interval: Duration,
    poller: Option<JoinHandle<()>>,
}

impl RouteTablePathObserver {
    pub fn new(tunnel_interface: Option<String>, poll_interval: Duration) -> Self {
        Self::with_route_file(PROC_NET_ROUTE, tunnel_interface, poll_interval)
    }

    pub fn with_route_file(
        route_file: impl Into<PathBuf>,
        tunnel_interface: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            route_file: route_file.into(),
            tunnel_interface,
            poll_interval,
            poller: None,
        }
    }
}

impl DefaultPathObserver for RouteTablePathObserver {
    fn current_path_status(&self) -> Option<PathStatus> {
        read_path_status(&self.route_file, self.tunnel_interface.as_deref())
    }

    fn start(&mut self, updates: mpsc::UnboundedSender<PathStatus>) {
        self.stop();

        let route_file = self.route_file.clone();
        let tunnel_interface = self.tunnel_interface.clone();
        let mut timer = tokio::time::interval(self.poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.poller = Some(tokio::spawn(async move {
            let mut last = None;
            loop {
                timer.tick().await;
                let status = read_path_status(&route_file, tunnel_interface.as_deref())
                    .unwrap_or(PathStatus::Unknown);
                if last == Some(status) {
                    continue;
                }
                debug!(?status, "Default path changed");
                last = Some(status);
                if updates.send(status).is_err() {
                    return;
                }
            }
        }));
    }

    fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

impl Drop for RouteTablePathObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_path_status(route_file: &Path, tunnel_interface: Option<&str>) -> Option<PathStatus> {
    match std::fs::read_to_string(route_file) {
        Ok(table) => Some(parse_route_table(&table, tunnel_interface)),
        Err(e) => {
            warn!(path = %route_file.display(), error = %e, "Failed to read routing table");
            None
        }
    }
}

/// Derive the path status from the contents of `/proc/net/route`.
fn parse_route_table(table: &str, tunnel_interface: Option<&str>) -> PathStatus {
    let has_default_route = table.lines().skip(1).any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [iface, destination, _gateway, flags, ..] = fields.as_slice() else {
            return false;
        };
        let is_up = u32::from_str_radix(flags, 16).is_ok_and(|flags| flags & RTF_UP != 0);
        *destination == "00000000" && is_up && Some(*iface) != tunnel_interface
    });

    if has_default_route {
        PathStatus::Satisfied
    } else {
        PathStatus::Unsatisfied
    }
}
