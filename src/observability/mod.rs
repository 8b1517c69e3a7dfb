//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via tracing-subscriber
//! - OpenTelemetry/OTLP metrics for poll ticks, broadcasts and connections

pub mod metrics;
pub mod tracing;
