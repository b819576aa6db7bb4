/// Errors returned by the [`TunnelMonitor`](super::TunnelMonitor) handle.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Tunnel monitor actor has stopped")]
    ActorStopped,
}
