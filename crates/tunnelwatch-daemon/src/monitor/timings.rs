//! Tunnel monitor timings.

use std::time::Duration;

use tunnelwatch_core::MonitorConfig;

/// Timing configuration of the connection monitor. Built once and never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelMonitorTimings {
    /// Interval between heartbeat pings while traffic is flowing.
    pub heartbeat_ping_interval: Duration,
    /// How long a heartbeat reply may stay outstanding before retrying.
    pub heartbeat_reply_timeout: Duration,
    /// Time without a reply after which the connection is considered lost.
    pub ping_timeout: Duration,
    /// Minimum delay between two consecutive pings.
    pub ping_delay: Duration,
    /// Establish timeout for the first connection attempt.
    pub initial_establish_timeout: Duration,
    /// Multiplier applied to the establish timeout after each failed attempt.
    pub establish_timeout_multiplier: u32,
    /// Period of the connectivity check timer.
    pub connectivity_check_interval: Duration,
    /// Outbound-only traffic window after which a ping is forced.
    pub inbound_traffic_timeout: Duration,
    /// Idle window in either direction after which a ping is forced.
    pub traffic_timeout: Duration,
}

impl Default for TunnelMonitorTimings {
    fn default() -> Self {
        Self {
            heartbeat_ping_interval: Duration::from_secs(10),
            heartbeat_reply_timeout: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(15),
            ping_delay: Duration::from_secs(3),
            initial_establish_timeout: Duration::from_secs(4),
            establish_timeout_multiplier: 2,
            connectivity_check_interval: Duration::from_secs(1),
            inbound_traffic_timeout: Duration::from_secs(5),
            traffic_timeout: Duration::from_secs(120),
        }
    }
}

impl TunnelMonitorTimings {
    /// Window in which traffic counts as "flowing" for heartbeat purposes.
    pub fn traffic_flow_timeout(&self) -> Duration {
        self.heartbeat_ping_interval / 2
    }

    /// Upper bound of the establish timeout backoff.
    pub const fn max_establish_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Establish timeout for the given (0-indexed) retry attempt:
    /// `initial * multiplier^attempt`, saturating and capped at
    /// [`Self::max_establish_timeout`].
    pub fn establish_timeout(&self, retry_attempt: u32) -> Duration {
        let factor = self
            .establish_timeout_multiplier
            .saturating_pow(retry_attempt);
        self.initial_establish_timeout
            .saturating_mul(factor)
            .min(self.max_establish_timeout())
    }
}

impl From<&MonitorConfig> for TunnelMonitorTimings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            heartbeat_ping_interval: Duration::from_millis(config.heartbeat_ping_interval_ms),
            heartbeat_reply_timeout: Duration::from_millis(config.heartbeat_reply_timeout_ms),
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
            ping_delay: Duration::from_millis(config.ping_delay_ms),
            initial_establish_timeout: Duration::from_millis(config.initial_establish_timeout_ms),
            establish_timeout_multiplier: config.establish_timeout_multiplier,
            connectivity_check_interval: Duration::from_millis(
                config.connectivity_check_interval_ms,
            ),
            inbound_traffic_timeout: Duration::from_millis(config.inbound_traffic_timeout_ms),
            traffic_timeout: Duration::from_millis(config.traffic_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_timings() {
        let timings = TunnelMonitorTimings::default();
        assert_eq!(timings.traffic_flow_timeout(), Duration::from_secs(5));
        assert_eq!(timings.max_establish_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn exponential_establish_timeouts() {
        let timings = TunnelMonitorTimings::default();

        // 4s, 8s, 15s (capped), 15s
        assert_eq!(timings.establish_timeout(0), Duration::from_secs(4));
        assert_eq!(timings.establish_timeout(1), Duration::from_secs(8));
        assert_eq!(timings.establish_timeout(2), Duration::from_secs(15));
        assert_eq!(timings.establish_timeout(3), Duration::from_secs(15));
    }

    #[test]
    fn establish_timeout_saturates() {
        let timings = TunnelMonitorTimings::default();
        assert_eq!(timings.establish_timeout(64), timings.max_establish_timeout());
        assert_eq!(
            timings.establish_timeout(u32::MAX),
            timings.max_establish_timeout()
        );

        let huge = TunnelMonitorTimings {
            initial_establish_timeout: Duration::MAX,
            establish_timeout_multiplier: u32::MAX,
            ..Default::default()
        };
        assert_eq!(huge.establish_timeout(u32::MAX), huge.max_establish_timeout());
    }

    #[test]
    fn establish_timeout_is_monotonic_and_bounded() {
        let timings = TunnelMonitorTimings::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let timeout = timings.establish_timeout(attempt);
            assert!(timeout >= previous, "attempt {attempt} decreased");
            assert!(timeout <= timings.max_establish_timeout());
            previous = timeout;
        }
    }

    #[test]
    fn multiplier_of_one_keeps_initial_timeout() {
        let timings = TunnelMonitorTimings {
            establish_timeout_multiplier: 1,
            ..Default::default()
        };
        assert_eq!(timings.establish_timeout(100), Duration::from_secs(4));
    }

    #[test]
    fn built_from_config() {
        let config = MonitorConfig {
            ping_timeout_ms: 20_000,
            heartbeat_ping_interval_ms: 12_000,
            ..Default::default()
        };
        let timings = TunnelMonitorTimings::from(&config);
        assert_eq!(timings.ping_timeout, Duration::from_secs(20));
        assert_eq!(timings.traffic_flow_timeout(), Duration::from_secs(6));
        assert_eq!(timings.ping_delay, Duration::from_secs(3));

        assert_eq!(
            TunnelMonitorTimings::from(&MonitorConfig::default()),
            TunnelMonitorTimings::default()
        );
    }
}
