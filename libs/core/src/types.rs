use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered multi-value map used for headers and query parameters.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// Appends `value` under `key`, keeping earlier values for the same key.
pub fn push_value(map: &mut MultiMap, key: impl Into<String>, value: impl Into<String>) {
    map.entry(key.into()).or_default().push(value.into());
}

/// An HTTP call, either routed to a declared API or proxied untouched.
///
/// ```
/// use membrane_core::HttpRequest;
///
/// let req = HttpRequest::new("GET", "/items/42");
/// assert_eq!(req.method, "GET");
/// assert!(req.body.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub path_params: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: MultiMap,
    #[serde(default)]
    pub headers: MultiMap,
    #[serde(default, with = "base64_body")]
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }
}

/// One pub/sub delivery. `message` is the inner payload with transport framing removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub topic_name: String,
    #[serde(with = "base64_body")]
    pub message: Bytes,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlobEventType {
    Created,
    Deleted,
}

/// A change to an object in a bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlobEvent {
    pub bucket_name: String,
    pub key: String,
    pub event_type: BlobEventType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTick {
    pub schedule_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebsocketEventKind {
    Connect {
        #[serde(default, rename = "queryParams")]
        query_params: MultiMap,
    },
    Disconnect,
    Message {
        #[serde(default, with = "base64_body")]
        body: Bytes,
    },
}

/// Socket lifecycle or message event. The connection id is opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketEvent {
    pub connection_id: String,
    pub socket_name: String,
    pub kind: WebsocketEventKind,
}

/// Every inbound event ends up as exactly one of these before it reaches a handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "shape", content = "request", rename_all = "lowercase")]
pub enum NormalizedRequest {
    Http(HttpRequest),
    Topic(TopicMessage),
    Blob(BlobEvent),
    Schedule(ScheduleTick),
    Websocket(WebsocketEvent),
}

impl NormalizedRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedRequest::Http(_) => "http",
            NormalizedRequest::Topic(_) => "topic",
            NormalizedRequest::Blob(_) => "blob",
            NormalizedRequest::Schedule(_) => "schedule",
            NormalizedRequest::Websocket(_) => "websocket",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: MultiMap,
    #[serde(default, with = "base64_body")]
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: MultiMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        push_value(&mut self.headers, name, value);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acknowledgement {
    pub success: bool,
}

impl Acknowledgement {
    pub fn ok() -> Self {
        Self { success: true }
    }

    pub fn failed() -> Self {
        Self { success: false }
    }
}

/// Websocket handlers acknowledge and may additionally refuse a connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebsocketReply {
    #[serde(flatten)]
    pub ack: Acknowledgement,
    #[serde(default)]
    pub rejected: bool,
}

impl WebsocketReply {
    pub fn accepted() -> Self {
        Self {
            ack: Acknowledgement::ok(),
            rejected: false,
        }
    }

    pub fn rejected() -> Self {
        Self {
            ack: Acknowledgement::ok(),
            rejected: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum NormalizedResponse {
    Http(HttpResponse),
    Ack(Acknowledgement),
}

impl From<HttpResponse> for NormalizedResponse {
    fn from(response: HttpResponse) -> Self {
        NormalizedResponse::Http(response)
    }
}

impl From<Acknowledgement> for NormalizedResponse {
    fn from(ack: Acknowledgement) -> Self {
        NormalizedResponse::Ack(ack)
    }
}

mod base64_body {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(raw.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bodies_travel_as_base64_strings() {
        let mut req = HttpRequest::new("POST", "/upload");
        req.body = Bytes::from_static(b"\x00\xffbinary");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["body"], "AP9iaW5hcnk=");
        let back: HttpRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back.body, req.body);
    }

    #[test]
    fn missing_body_decodes_as_empty() {
        let resp: HttpResponse = serde_json::from_value(json!({"status": 204})).unwrap();
        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
        let resp: HttpResponse =
            serde_json::from_value(json!({"status": 200, "body": null})).unwrap();
        assert!(resp.body.is_empty());
    }

    #[test]
    fn websocket_reply_flattens_acknowledgement() {
        let reply: WebsocketReply =
            serde_json::from_value(json!({"success": true, "rejected": true})).unwrap();
        assert_eq!(reply, WebsocketReply::rejected());
        let reply: WebsocketReply = serde_json::from_value(json!({"success": false})).unwrap();
        assert!(!reply.ack.success);
        assert!(!reply.rejected);
    }

    #[test]
    fn normalized_request_is_tagged_by_shape() {
        let req = NormalizedRequest::Schedule(ScheduleTick {
            schedule_name: "nightly".into(),
        });
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"shape": "schedule", "request": {"scheduleName": "nightly"}})
        );
        assert_eq!(req.kind(), "schedule");
    }

    #[test]
    fn push_value_keeps_order() {
        let mut headers = MultiMap::new();
        push_value(&mut headers, "accept", "a");
        push_value(&mut headers, "accept", "b");
        assert_eq!(headers["accept"], vec!["a", "b"]);
    }
}
