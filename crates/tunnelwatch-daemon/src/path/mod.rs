//! Observation of the underlying (physical) network path.

mod route_table;

pub use route_table::RouteTablePathObserver;

use tokio::sync::mpsc;

/// Reachability status of the default network path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// A usable path exists.
    Satisfied,
    /// A path could be established on demand.
    Satisfiable,
    /// No usable path.
    Unsatisfied,
    Unknown,
}

impl PathStatus {
    pub const fn is_reachable(self) -> bool {
        matches!(self, Self::Satisfied | Self::Satisfiable)
    }
}

/// Reports reachability transitions of the default network path.
pub trait DefaultPathObserver: Send {
    /// Last known status, if one is available synchronously.
    fn current_path_status(&self) -> Option<PathStatus>;

    /// Begin delivering status updates on `updates`. Calling `start` while
    /// already started replaces the previous subscription.
    fn start(&mut self, updates: mpsc::UnboundedSender<PathStatus>);

    /// Stop delivering updates.
    fn stop(&mut self);
}
