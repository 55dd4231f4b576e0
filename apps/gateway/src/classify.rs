use serde_json::Value;

/// Boolean marker sent by platform health checks.
pub const HEALTH_MARKER: &str = "x-membrane-healthcheck";
/// Field naming the schedule on timer envelopes.
pub const SCHEDULE_FIELD: &str = "x-membrane-schedule";
pub const PUBSUB_SOURCE: &str = "aws:sns";
pub const STORAGE_SOURCE: &str = "aws:s3";

/// The recognized inbound envelope structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Http,
    HealthProbe,
    PubSub,
    Blob,
    Schedule,
    Websocket,
    Unrecognized,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Http => "http",
            Shape::HealthProbe => "health",
            Shape::PubSub => "pubsub",
            Shape::Blob => "blob",
            Shape::Schedule => "schedule",
            Shape::Websocket => "websocket",
            Shape::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides the shape of a raw envelope.
///
/// Rules are tried in a fixed order and the first match wins, because HTTP and
/// websocket envelopes share most of their optional fields:
///
/// 1. non-empty top-level `routeKey` → [`Shape::Http`]
/// 2. health marker set to `true` → [`Shape::HealthProbe`]
/// 3. first record sourced from pub/sub → [`Shape::PubSub`]
/// 4. first record sourced from storage → [`Shape::Blob`]
/// 5. non-empty schedule field → [`Shape::Schedule`]
/// 6. non-empty `requestContext.connectionId` → [`Shape::Websocket`]
///
/// ```
/// use membrane_gateway::classify::{classify, Shape};
/// use serde_json::json;
///
/// assert_eq!(classify(&json!({"routeKey": "GET /"})), Shape::Http);
/// assert_eq!(classify(&json!(42)), Shape::Unrecognized);
/// ```
pub fn classify(envelope: &Value) -> Shape {
    if non_empty_str(envelope.get("routeKey")) {
        return Shape::Http;
    }
    if envelope.get(HEALTH_MARKER).and_then(Value::as_bool) == Some(true) {
        return Shape::HealthProbe;
    }
    match first_record_source(envelope) {
        Some(PUBSUB_SOURCE) => return Shape::PubSub,
        Some(STORAGE_SOURCE) => return Shape::Blob,
        _ => {}
    }
    if non_empty_str(envelope.get(SCHEDULE_FIELD)) {
        return Shape::Schedule;
    }
    let connection_id = envelope
        .get("requestContext")
        .and_then(|ctx| ctx.get("connectionId"));
    if non_empty_str(connection_id) {
        return Shape::Websocket;
    }
    Shape::Unrecognized
}

fn non_empty_str(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

fn first_record_source(envelope: &Value) -> Option<&str> {
    let records = envelope
        .get("Records")
        .or_else(|| envelope.get("records"))?
        .as_array()?;
    let first = records.first()?;
    first
        .get("EventSource")
        .or_else(|| first.get("eventSource"))?
        .as_str()
}
