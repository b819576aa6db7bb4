//! `OpenTelemetry` export and monitor instruments.
//!
//! Only compiled with the `metrics` Cargo feature. Sets up OTLP exporters for
//! traces and metrics and defines the counters the supervisor records for
//! tunnel lifecycle events.

use opentelemetry::metrics::Counter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

/// Errors that can occur during metrics / tracing pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to build an OTLP exporter.
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// Failed during `OTel` SDK shutdown or flush.
    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the `OpenTelemetry` providers alive.
///
/// Dropping it does not flush; call [`MetricsGuard::shutdown`] before exit.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Tracer backed by the OTLP span exporter, for `tracing-opentelemetry`.
    pub fn tracer(&self, name: &'static str) -> SdkTracer {
        self.tracer_provider.tracer(name)
    }

    /// Flush and shut down both providers.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Build OTLP (gRPC) exporters for traces and metrics and install them as the
/// global providers.
///
/// * `endpoint` -- OTLP receiver URL, e.g. `"http://localhost:4317"`.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Counters for tunnel monitor lifecycle events.
#[derive(Clone)]
pub struct MonitorMetrics {
    connection_established: Counter<u64>,
    connection_lost: Counter<u64>,
    reachability_changed: Counter<u64>,
}

impl MonitorMetrics {
    /// Create the instruments on the global meter provider.
    pub fn new() -> Self {
        let meter = global::meter("tunnelwatch");
        Self {
            connection_established: meter
                .u64_counter("tunnelwatch.connection_established")
                .with_description("First probe reply received after (re)starting the monitor")
                .build(),
            connection_lost: meter
                .u64_counter("tunnelwatch.connection_lost")
                .with_description("Liveness timeouts that required a tunnel rebuild")
                .build(),
            reachability_changed: meter
                .u64_counter("tunnelwatch.network_reachability_changed")
                .with_description("Reachability transitions of the underlying network")
                .build(),
        }
    }

    pub fn record_established(&self, interface: &str) {
        self.connection_established
            .add(1, &[KeyValue::new("interface", interface.to_string())]);
    }

    pub fn record_lost(&self, interface: &str, retry_attempt: u32) {
        self.connection_lost.add(
            1,
            &[
                KeyValue::new("interface", interface.to_string()),
                KeyValue::new("retry_attempt", i64::from(retry_attempt)),
            ],
        );
    }

    pub fn record_reachability(&self, reachable: bool) {
        self.reachability_changed
            .add(1, &[KeyValue::new("reachable", reachable)]);
    }
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
