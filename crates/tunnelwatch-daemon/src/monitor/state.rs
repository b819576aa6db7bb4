//! Connection health state and its evaluation.
//!
//! [`TunnelMonitorState`] is pure data plus transition logic. It never
//! performs I/O; the monitor actor feeds it counters, probe results and
//! timestamps and acts on the returned [`ConnectionEvaluation`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::timings::TunnelMonitorTimings;
use crate::device::NetStats;
use crate::probe::PingSendResult;

/// Lifecycle state of the connection monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle, no probing, no timer.
    Stopped,
    /// Started, waiting for the first path reachability signal.
    PendingStart,
    /// Underlying network is unreachable; probing suspended.
    WaitingConnectivity,
    /// Probing, no reply received yet.
    Connecting,
    /// At least one reply received; heartbeat mode.
    Connected,
    /// Connection lost; the owner must restart the monitor.
    Recovering,
}

impl ConnectionState {
    /// Whether the connectivity check runs in this state.
    pub const fn is_probing(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Outcome of a connectivity evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvaluation {
    Ok,
    SendInitialPing,
    SendNextPing,
    SendHeartbeatPing,
    RetryHeartbeatPing,
    SuspendHeartbeat,
    InboundTrafficTimeout,
    TrafficTimeout,
    PingTimeout,
}

/// Outstanding and completed probes.
#[derive(Debug, Default, Clone)]
pub struct PingStats {
    /// Send time of each in-flight probe, keyed by sequence number.
    pub requests: HashMap<u16, Instant>,
    pub last_request_at: Option<Instant>,
    pub last_reply_at: Option<Instant>,
}

/// Mutable monitor state. Owned and mutated by a single writer.
#[derive(Debug, Clone)]
pub struct TunnelMonitorState {
    pub connection_state: ConnectionState,
    pub net_stats: NetStats,
    pub ping_stats: PingStats,
    /// Anchor for "time since something good happened".
    pub timeout_reference: Instant,
    pub last_seen_rx: Option<Instant>,
    pub last_seen_tx: Option<Instant>,
    pub is_heartbeat_suspended: bool,
    /// Consecutive failed establishment attempts.
    pub retry_attempt: u32,
    timings: TunnelMonitorTimings,
}

impl TunnelMonitorState {
    pub fn new(timings: TunnelMonitorTimings, now: Instant) -> Self {
        Self {
            connection_state: ConnectionState::Stopped,
            net_stats: NetStats::default(),
            ping_stats: PingStats::default(),
            timeout_reference: now,
            last_seen_rx: None,
            last_seen_tx: None,
            is_heartbeat_suspended: false,
            retry_attempt: 0,
            timings,
        }
    }

    pub const fn timings(&self) -> &TunnelMonitorTimings {
        &self.timings
    }

    /// Decide what the monitor should do next.
    pub fn evaluate_connection(&self, now: Instant, ping_timeout: Duration) -> ConnectionEvaluation {
        match self.connection_state {
            ConnectionState::Connecting => self.evaluate_connecting(now, ping_timeout),
            ConnectionState::Connected => self.evaluate_connected(now, ping_timeout),
            ConnectionState::Stopped
            | ConnectionState::PendingStart
            | ConnectionState::WaitingConnectivity
            | ConnectionState::Recovering => ConnectionEvaluation::Ok,
        }
    }

    fn evaluate_connecting(&self, now: Instant, ping_timeout: Duration) -> ConnectionEvaluation {
        if now.saturating_duration_since(self.timeout_reference) >= ping_timeout {
            return ConnectionEvaluation::PingTimeout;
        }

        let Some(last_request_at) = self.ping_stats.last_request_at else {
            return ConnectionEvaluation::SendInitialPing;
        };

        if now.saturating_duration_since(last_request_at) >= self.timings.ping_delay {
            ConnectionEvaluation::SendNextPing
        } else {
            ConnectionEvaluation::Ok
        }
    }

    fn evaluate_connected(&self, now: Instant, ping_timeout: Duration) -> ConnectionEvaluation {
        let timings = &self.timings;

        if now.saturating_duration_since(self.timeout_reference) >= ping_timeout
            && !self.is_heartbeat_suspended
        {
            return ConnectionEvaluation::PingTimeout;
        }

        let Some(last_request_at) = self.ping_stats.last_request_at else {
            return ConnectionEvaluation::SendInitialPing;
        };
        let time_since_last_ping = now.saturating_duration_since(last_request_at);

        if self
            .outstanding_reply_duration(now)
            .is_some_and(|outstanding| outstanding >= timings.heartbeat_reply_timeout)
            && time_since_last_ping >= timings.ping_delay
            && !self.is_heartbeat_suspended
        {
            return ConnectionEvaluation::RetryHeartbeatPing;
        }

        let (Some(last_seen_rx), Some(last_seen_tx)) = (self.last_seen_rx, self.last_seen_tx)
        else {
            return ConnectionEvaluation::Ok;
        };
        let rx_elapsed = now.saturating_duration_since(last_seen_rx);
        let tx_elapsed = now.saturating_duration_since(last_seen_tx);

        if time_since_last_ping >= timings.heartbeat_ping_interval {
            let flow = timings.traffic_flow_timeout();
            if rx_elapsed <= flow || tx_elapsed <= flow {
                return ConnectionEvaluation::SendHeartbeatPing;
            }
            if !self.is_heartbeat_suspended {
                return ConnectionEvaluation::SuspendHeartbeat;
            }
        }

        if time_since_last_ping >= timings.ping_delay {
            if rx_elapsed >= timings.traffic_timeout || tx_elapsed >= timings.traffic_timeout {
                return ConnectionEvaluation::TrafficTimeout;
            }
            if last_seen_tx > last_seen_rx && rx_elapsed >= timings.inbound_traffic_timeout {
                return ConnectionEvaluation::InboundTrafficTimeout;
            }
        }

        ConnectionEvaluation::Ok
    }

    /// How long the most recent probe has gone unanswered, if it has.
    fn outstanding_reply_duration(&self, now: Instant) -> Option<Duration> {
        let last_request_at = self.ping_stats.last_request_at?;
        match self.ping_stats.last_reply_at {
            Some(last_reply_at) if last_reply_at >= last_request_at => None,
            _ => Some(now.saturating_duration_since(last_request_at)),
        }
    }

    /// Timeout applicable in the current state. Establishment backs off
    /// exponentially with the retry attempt.
    pub fn ping_timeout(&self) -> Duration {
        match self.connection_state {
            ConnectionState::Connecting => self.timings.establish_timeout(self.retry_attempt),
            _ => self.timings.ping_timeout,
        }
    }

    /// Record new counters, stamping each direction that increased.
    pub fn update_net_stats(&mut self, new_stats: NetStats, now: Instant) {
        if new_stats.bytes_received > self.net_stats.bytes_received {
            self.last_seen_rx = Some(now);
        }
        if new_stats.bytes_sent > self.net_stats.bytes_sent {
            self.last_seen_tx = Some(now);
        }
        self.net_stats = new_stats;
    }

    /// Record a sent request. Requests older than `ping_timeout` can no
    /// longer keep the connection alive and are dropped.
    pub fn update_ping_stats(&mut self, send_result: PingSendResult, now: Instant) {
        let max_age = self.timings.ping_timeout;
        self.ping_stats
            .requests
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) < max_age);
        self.ping_stats
            .requests
            .insert(send_result.sequence_number, now);
        self.ping_stats.last_request_at = Some(now);
    }

    /// Resolve a reply. Returns the send time, or `None` for an unknown or
    /// stale sequence number, in which case nothing changes.
    pub fn set_ping_reply_received(&mut self, sequence_number: u16, now: Instant) -> Option<Instant> {
        let sent_at = self.ping_stats.requests.remove(&sequence_number)?;
        self.ping_stats.last_reply_at = Some(now);
        self.timeout_reference = now;
        Some(sent_at)
    }

    pub const fn increment_retry_attempt(&mut self) {
        self.retry_attempt = self.retry_attempt.saturating_add(1);
    }

    /// Clear counters and probe bookkeeping.
    pub fn reset(&mut self, reset_retry_attempts: bool) {
        self.net_stats = NetStats::default();
        self.last_seen_rx = None;
        self.last_seen_tx = None;
        self.ping_stats = PingStats::default();
        self.is_heartbeat_suspended = false;
        if reset_retry_attempts {
            self.retry_attempt = 0;
        }
    }
}
