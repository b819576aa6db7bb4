//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output,
//! and, with the `metrics` feature, an `OpenTelemetry` export layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"tunnelwatch_daemon=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!log_json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Initialise tracing and, when an endpoint is given, the OTLP pipeline.
///
/// Returns the guard that keeps the exporters alive. Falls back to plain
/// tracing (and logs the failure) if the exporters cannot be built.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    endpoint: Option<&str>,
) -> Option<crate::metrics::MetricsGuard> {
    let Some(endpoint) = endpoint else {
        init_tracing(default_filter, log_json);
        return None;
    };

    match crate::metrics::init_metrics(endpoint) {
        Ok(guard) => {
            tracing_subscriber::registry()
                .with(env_filter(default_filter))
                .with(log_json.then(|| tracing_subscriber::fmt::layer().json()))
                .with((!log_json).then(tracing_subscriber::fmt::layer))
                .with(tracing_opentelemetry::layer().with_tracer(guard.tracer("tunnelwatch")))
                .init();
            tracing::info!(endpoint, "OpenTelemetry export enabled");
            Some(guard)
        }
        Err(e) => {
            init_tracing(default_filter, log_json);
            tracing::warn!(endpoint, error = %e, "Failed to initialise OpenTelemetry, continuing without it");
            None
        }
    }
}

/// Initialise tracing; without the `metrics` feature the endpoint is ignored.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    _endpoint: Option<&str>,
) -> Option<()> {
    init_tracing(default_filter, log_json);
    None
}
