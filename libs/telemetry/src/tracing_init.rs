use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{HasExportConfig, SpanExporter};
use opentelemetry_sdk::{Resource, propagation::TraceContextPropagator, trace::SdkTracerProvider};
use tracing::warn;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{TelemetryConfig, TelemetryProtocol};

static INSTALLED: OnceLock<()> = OnceLock::new();
static PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();
static EXPORTING: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber once; later calls only refresh the export flag.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<()> {
    let exporting = cfg.exporter_enabled();
    EXPORTING.store(exporting, Ordering::SeqCst);
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let otel = if exporting {
        let provider = tracer_provider(&cfg)?;
        let layer = OpenTelemetryLayer::new(provider.tracer(cfg.service_name.clone()));
        PROVIDER.set(provider).ok();
        Some(layer)
    } else {
        None
    };
    let fmt = if cfg.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber installed by the host (or a test harness) wins.
    tracing_subscriber::registry()
        .with(otel)
        .with(filter)
        .with(fmt)
        .try_init()
        .ok();
    INSTALLED.set(()).ok();
    Ok(())
}

pub fn telemetry_enabled() -> bool {
    EXPORTING.load(Ordering::SeqCst)
}

/// Pushes buffered spans to the collector. The process may be frozen between
/// invocations, so pull-based loops call this after every event.
pub fn flush() {
    if let Some(provider) = PROVIDER.get() {
        force_flush(provider);
    }
}

/// Flushes and shuts the span exporter down. Later spans are dropped.
pub fn shutdown() {
    if let Some(provider) = PROVIDER.get() {
        force_flush(provider);
        if let Err(err) = provider.shutdown() {
            warn!(error = %err, "failed to shut down tracer provider");
        }
    }
}

fn force_flush(provider: &SdkTracerProvider) {
    if let Err(err) = provider.force_flush() {
        warn!(error = %err, "failed to flush spans");
    }
}

fn tracer_provider(cfg: &TelemetryConfig) -> Result<SdkTracerProvider> {
    let exporter = match cfg.protocol {
        TelemetryProtocol::Grpc => {
            let mut builder = SpanExporter::builder().with_tonic();
            builder.export_config().endpoint = Some(cfg.endpoint.clone());
            builder.build()?
        }
        TelemetryProtocol::HttpProtobuf => {
            let mut builder = SpanExporter::builder().with_http();
            builder.export_config().endpoint = Some(cfg.endpoint.clone());
            builder.build()?
        }
    };
    let resource = Resource::builder_empty()
        .with_service_name(cfg.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", cfg.service_version.clone()),
            KeyValue::new("deployment.environment", cfg.environment.clone()),
        ])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());
    Ok(provider)
}
