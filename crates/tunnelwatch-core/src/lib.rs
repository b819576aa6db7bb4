//! `tunnelwatch` Core Library
//!
//! Shared functionality for `tunnelwatch` components:
//! - Configuration resolution and hierarchy
//! - Tracing/logging initialisation
//! - Optional `OpenTelemetry` export
//! - Common error types

pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod tracing_init;

pub use config::{Config, DaemonConfig, MonitorConfig};
pub use error::{Error, Result};
