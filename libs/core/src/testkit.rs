use crate::handler::{
    ApiHandler, BucketHandler, HandlerError, Handlers, HttpProxyHandler, ScheduleHandler,
    SubscriptionHandler, WebsocketHandler,
};
use crate::types::{
    Acknowledgement, BlobEvent, HttpRequest, HttpResponse, NormalizedRequest, ScheduleTick,
    TopicMessage, WebsocketEvent, WebsocketEventKind, WebsocketReply,
};
use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("workspace root")
        .to_path_buf()
}

/// Loads a JSON fixture relative to the workspace root.
pub fn load_fixture(path: impl AsRef<Path>) -> Value {
    let full = workspace_root().join(path.as_ref());
    let content = fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", full.display()));
    serde_json::from_str(&content)
        .unwrap_or_else(|err| panic!("invalid json in {}: {err}", full.display()))
}

/// Compares two JSON values after sorting object keys.
pub fn assert_json_eq_stable(left: &Value, right: &Value) {
    let normalized_left = normalize_json(left);
    let normalized_right = normalize_json(right);
    if normalized_left != normalized_right {
        panic!(
            "json mismatch\nleft:\n{}\nright:\n{}",
            serde_json::to_string_pretty(&normalized_left).unwrap_or_default(),
            serde_json::to_string_pretty(&normalized_right).unwrap_or_default()
        );
    }
}

fn normalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), normalize_json(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_json).collect()),
        other => other.clone(),
    }
}

/// A delivered request plus the logical API it was routed to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub api: Option<String>,
    pub request: NormalizedRequest,
}

type Predicate = Box<dyn Fn(&NormalizedRequest) -> bool + Send + Sync>;

/// Handler double that records every delivery in order.
///
/// HTTP handlers echo the request body back with status 200 unless a fixed
/// response is configured.
pub struct RecordingHandlers {
    deliveries: Mutex<Vec<Delivery>>,
    http_response: Option<HttpResponse>,
    fail_when: Option<Predicate>,
    nack_when: Option<Predicate>,
    reject_connects: bool,
}

impl Default for RecordingHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHandlers {
    pub fn new() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            http_response: None,
            fail_when: None,
            nack_when: None,
            reject_connects: false,
        }
    }

    pub fn with_http_response(mut self, response: HttpResponse) -> Self {
        self.http_response = Some(response);
        self
    }

    /// Makes matching deliveries return a `HandlerError`.
    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NormalizedRequest) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Makes matching deliveries acknowledge with `success: false`.
    pub fn nack_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NormalizedRequest) -> bool + Send + Sync + 'static,
    {
        self.nack_when = Some(Box::new(predicate));
        self
    }

    pub fn reject_connects(mut self) -> Self {
        self.reject_connects = true;
        self
    }

    pub fn into_handlers(self: &Arc<Self>) -> Handlers {
        Handlers::uniform(self.clone())
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    pub async fn take_deliveries(&self) -> Vec<Delivery> {
        let mut guard = self.deliveries.lock().await;
        std::mem::take(&mut *guard)
    }

    async fn record(
        &self,
        api: Option<&str>,
        request: NormalizedRequest,
    ) -> Result<Acknowledgement, HandlerError> {
        let failing = self.fail_when.as_ref().is_some_and(|f| f(&request));
        let nacked = self.nack_when.as_ref().is_some_and(|f| f(&request));
        self.deliveries.lock().await.push(Delivery {
            api: api.map(str::to_string),
            request,
        });
        if failing {
            return Err(HandlerError::failed("recording handler configured to fail"));
        }
        Ok(Acknowledgement { success: !nacked })
    }

    async fn respond_http(
        &self,
        api: Option<&str>,
        request: HttpRequest,
    ) -> Result<HttpResponse, HandlerError> {
        let body = request.body.clone();
        self.record(api, NormalizedRequest::Http(request)).await?;
        Ok(self
            .http_response
            .clone()
            .unwrap_or_else(|| HttpResponse::new(200, body)))
    }
}

#[async_trait]
impl ApiHandler for RecordingHandlers {
    async fn handle(&self, api: &str, request: HttpRequest) -> Result<HttpResponse, HandlerError> {
        self.respond_http(Some(api), request).await
    }
}

#[async_trait]
impl HttpProxyHandler for RecordingHandlers {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HandlerError> {
        self.respond_http(None, request).await
    }
}

#[async_trait]
impl ScheduleHandler for RecordingHandlers {
    async fn handle(&self, tick: ScheduleTick) -> Result<Acknowledgement, HandlerError> {
        self.record(None, NormalizedRequest::Schedule(tick)).await
    }
}

#[async_trait]
impl SubscriptionHandler for RecordingHandlers {
    async fn handle(&self, message: TopicMessage) -> Result<Acknowledgement, HandlerError> {
        self.record(None, NormalizedRequest::Topic(message)).await
    }
}

#[async_trait]
impl BucketHandler for RecordingHandlers {
    async fn handle(&self, event: BlobEvent) -> Result<Acknowledgement, HandlerError> {
        self.record(None, NormalizedRequest::Blob(event)).await
    }
}

#[async_trait]
impl WebsocketHandler for RecordingHandlers {
    async fn handle(&self, event: WebsocketEvent) -> Result<WebsocketReply, HandlerError> {
        let connecting = matches!(event.kind, WebsocketEventKind::Connect { .. });
        let ack = self.record(None, NormalizedRequest::Websocket(event)).await?;
        Ok(WebsocketReply {
            ack,
            rejected: connecting && self.reject_connects,
        })
    }
}
