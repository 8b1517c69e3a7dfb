//! OpenTelemetry/OTLP metrics.
//!
//! Key metrics:
//! - gradecast_ticks_total: Counter of poller ticks
//! - gradecast_poll_errors_total: Counter of failed change-log reads
//! - gradecast_changes_total: Counter of change-log entries broadcast
//! - gradecast_broadcasts_total: Counter of per-client deliveries, by outcome
//! - gradecast_connected_clients: Gauge of open WebSocket connections

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

use crate::notify::BroadcastReport;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Gradecast metrics registry.
#[derive(Debug)]
pub struct Metrics {
    pub ticks_total: Counter<u64>,
    pub poll_errors_total: Counter<u64>,
    pub changes_total: Counter<u64>,
    pub broadcasts_total: Counter<u64>,
    pub connected_clients: Gauge<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            ticks_total: meter
                .u64_counter("gradecast_ticks_total")
                .with_description("Number of change-log poll ticks")
                .with_unit("1")
                .init(),
            poll_errors_total: meter
                .u64_counter("gradecast_poll_errors_total")
                .with_description("Change-log reads that failed and were retried next tick")
                .with_unit("1")
                .init(),
            changes_total: meter
                .u64_counter("gradecast_changes_total")
                .with_description("Change-log entries included in broadcasts")
                .with_unit("1")
                .init(),
            broadcasts_total: meter
                .u64_counter("gradecast_broadcasts_total")
                .with_description("Per-client broadcast attempts by outcome")
                .with_unit("1")
                .init(),
            connected_clients: meter
                .u64_gauge("gradecast_connected_clients")
                .with_description("Open WebSocket connections")
                .with_unit("1")
                .init(),
        }
    }
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
/// Without an endpoint, metrics are recorded but not exported.
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_reader();
                }
            }
        } else {
            install_manual_reader();
        }

        Metrics::new(&global::meter("gradecast"))
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

pub fn record_tick() {
    if let Some(m) = METRICS.get() {
        m.ticks_total.add(1, &[]);
    }
}

pub fn record_poll_error() {
    if let Some(m) = METRICS.get() {
        m.poll_errors_total.add(1, &[]);
    }
}

/// Record one broadcast tick and its per-client outcomes.
pub fn record_broadcast(entries: usize, report: &BroadcastReport) {
    if let Some(m) = METRICS.get() {
        m.changes_total.add(entries as u64, &[]);
        for (outcome, count) in [
            ("delivered", report.delivered),
            ("skipped", report.skipped),
            ("removed", report.removed),
        ] {
            if count > 0 {
                m.broadcasts_total
                    .add(count as u64, &[KeyValue::new("outcome", outcome)]);
            }
        }
    }
}

pub fn record_connected_clients(count: usize) {
    if let Some(m) = METRICS.get() {
        m.connected_clients.record(count as u64, &[]);
    }
}
