//! Configuration resolution for tunnelwatch.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config_dir>/tunnelwatch/settings.json`)
//! 3. Explicit config file (passed on the command line)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete tunnelwatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Connection monitor timings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between heartbeat pings while traffic is flowing.
    pub heartbeat_ping_interval_ms: u64,
    /// How long a heartbeat reply may stay outstanding before retrying.
    pub heartbeat_reply_timeout_ms: u64,
    /// Time without a reply after which the connection is considered lost.
    pub ping_timeout_ms: u64,
    /// Minimum delay between two consecutive pings.
    pub ping_delay_ms: u64,
    /// Establish timeout used for the first connection attempt.
    pub initial_establish_timeout_ms: u64,
    /// Multiplier applied to the establish timeout per failed attempt.
    pub establish_timeout_multiplier: u32,
    /// Period of the connectivity check timer.
    pub connectivity_check_interval_ms: u64,
    /// Outbound-only traffic window after which a ping is forced.
    pub inbound_traffic_timeout_ms: u64,
    /// Idle window in either direction after which a ping is forced.
    pub traffic_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_ping_interval_ms: 10_000,
            heartbeat_reply_timeout_ms: 3_000,
            ping_timeout_ms: 15_000,
            ping_delay_ms: 3_000,
            initial_establish_timeout_ms: 4_000,
            establish_timeout_multiplier: 2,
            connectivity_check_interval_ms: 1_000,
            inbound_traffic_timeout_ms: 5_000,
            traffic_timeout_ms: 120_000,
        }
    }
}

impl MonitorConfig {
    /// Reject values the connection monitor cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("heartbeat_ping_interval_ms", self.heartbeat_ping_interval_ms),
            ("heartbeat_reply_timeout_ms", self.heartbeat_reply_timeout_ms),
            ("ping_timeout_ms", self.ping_timeout_ms),
            ("ping_delay_ms", self.ping_delay_ms),
            (
                "initial_establish_timeout_ms",
                self.initial_establish_timeout_ms,
            ),
            (
                "connectivity_check_interval_ms",
                self.connectivity_check_interval_ms,
            ),
            ("inbound_traffic_timeout_ms", self.inbound_traffic_timeout_ms),
            ("traffic_timeout_ms", self.traffic_timeout_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("monitor.{name} must be greater than 0")));
        }
        if self.establish_timeout_multiplier < 1 {
            return Err(Error::Config(
                "monitor.establish_timeout_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Name of the tunnel interface to monitor (e.g. `wg0`).
    pub interface: Option<String>,
    /// Address reachable only through the tunnel, used for probes.
    pub probe_address: Option<Ipv4Addr>,
    pub log_level: String,
    /// Shell command run when the connection is lost.
    pub on_connection_lost: Option<String>,
    /// Delay between running the repair hook and restarting the monitor.
    pub restart_delay_ms: u64,
    /// Poll interval of the routing-table path observer.
    pub path_poll_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interface: None,
            probe_address: None,
            log_level: "info".to_string(),
            on_connection_lost: None,
            restart_delay_ms: 1_000,
            path_poll_interval_ms: 2_000,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let global_path = global_config_path().filter(|path| path.exists());

    // A missing explicit file is an error; a missing global file is not
    let mut config = resolve_layers(global_path.as_deref(), explicit_path)?;

    // Apply environment overrides
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    config.monitor.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tunnelwatch").join("settings.json"))
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    serde_json::from_value(read_config_value(path)?).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Merge the config files key by key, so a later file only overrides the
/// keys it actually sets. Keys set by no file take their defaults.
fn resolve_layers(global: Option<&Path>, explicit: Option<&Path>) -> Result<Config> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in [global, explicit].into_iter().flatten() {
        merge_values(&mut merged, read_config_value(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("TUNNELWATCH_INTERFACE") {
        config.daemon.interface = Some(val);
    }
    if let Some(val) = var("TUNNELWATCH_PROBE_ADDRESS") {
        match val.parse() {
            Ok(addr) => config.daemon.probe_address = Some(addr),
            Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring invalid TUNNELWATCH_PROBE_ADDRESS"),
        }
    }
    if let Some(val) = var("TUNNELWATCH_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(val) = var("TUNNELWATCH_ON_CONNECTION_LOST") {
        config.daemon.on_connection_lost = Some(val);
    }
}
