//! Telemetry helpers for membrane services.
//! Installs the tracing subscriber (with optional OTLP span export) and records
//! the gateway's counters through the `metrics` facade.

use anyhow::Result;

mod config;
mod context;
mod counters;
mod tracing_init;

pub use config::{TelemetryConfig, TelemetryProtocol};
pub use context::TelemetryLabels;
pub use counters::{DISCOVERY_TOTAL, EVENTS_TOTAL, record_counter, with_common_fields};
pub use tracing_init::{flush, init_telemetry, shutdown, telemetry_enabled};

/// Installs the subscriber configured from `RUST_LOG`, `LOG_FORMAT` and the `OTEL_*` variables.
pub fn install(service_name: &str, service_version: &str) -> Result<()> {
    init_telemetry(TelemetryConfig::from_env(service_name, service_version))
}
