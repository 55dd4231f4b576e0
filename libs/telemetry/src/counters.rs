use crate::context::TelemetryLabels;
use metrics::Label;
use tracing::Span;

/// Events seen by the dispatcher, labelled by shape and outcome.
pub const EVENTS_TOTAL: &str = "membrane_events_total";
/// Resource inventory population attempts, labelled by outcome.
pub const DISCOVERY_TOTAL: &str = "membrane_discovery_total";

pub fn with_common_fields(span: &Span, request_id: &str, trace_id: Option<&str>) {
    span.record("request_id", tracing::field::display(request_id));
    if let Some(trace_id) = trace_id {
        span.record("trace_id", tracing::field::display(trace_id));
    }
}

pub fn record_counter(name: &'static str, value: u64, labels: &TelemetryLabels) {
    let labels: Vec<Label> = labels
        .tags()
        .into_iter()
        .map(|(key, value)| Label::new(key, value))
        .collect();
    metrics::counter!(name, labels).increment(value);
}
