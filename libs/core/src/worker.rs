use crate::handler::{
    ApiHandler, BucketHandler, HandlerError, HttpProxyHandler, ScheduleHandler,
    SubscriptionHandler, WebsocketHandler,
};
use crate::types::{
    Acknowledgement, BlobEvent, HttpRequest, HttpResponse, ScheduleTick, TopicMessage,
    WebsocketEvent, WebsocketReply,
};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{error, warn};

/// Worker endpoint used when no override is provided.
pub const DEFAULT_WORKER_URL: &str = "http://127.0.0.1:3000";

/// Where normalized requests are forwarded to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub base_url: String,
    /// How many transient retries to attempt locally before surfacing an error.
    pub max_retries: u8,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WORKER_URL.to_string(),
            max_retries: 2,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("MEMBRANE_WORKER_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WORKER_URL.to_string());
        let max_retries = lookup("MEMBRANE_WORKER_RETRIES")
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(2);
        Self {
            base_url,
            max_retries,
        }
    }
}

/// Implements every capability by POSTing the normalized request to the worker as JSON.
///
/// Routes: `apis/{name}`, `http`, `schedules`, `topics`, `buckets`, `websockets`.
pub struct HttpWorkerHandlers {
    client: reqwest::Client,
    base_url: String,
    max_retries: u8,
}

impl HttpWorkerHandlers {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HandlerError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| HandlerError::Transport(anyhow::Error::new(e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                HandlerError::Transport(anyhow::anyhow!(
                    "worker url {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_once<B, R>(&self, url: &Url, body: &B) -> Result<R, HandlerError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(HandlerError::Encode)?;
        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| HandlerError::Transport(anyhow::Error::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HandlerError::Transport(anyhow::Error::new(e)))?;
        serde_json::from_slice(&bytes).map_err(HandlerError::Decode)
    }

    async fn call<B, R>(&self, segments: &[&str], body: &B) -> Result<R, HandlerError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&url, body).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if attempt > self.max_retries || !is_transient(&err) {
                        error!(attempt, url = %url, error = %err, "worker request failed");
                        return Err(err);
                    }
                    warn!(attempt, url = %url, error = %err, "retrying worker request");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
            }
        }
    }
}

fn is_transient(err: &HandlerError) -> bool {
    match err {
        HandlerError::Transport(_) => true,
        HandlerError::Status { status } => *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl ApiHandler for HttpWorkerHandlers {
    async fn handle(&self, api: &str, request: HttpRequest) -> Result<HttpResponse, HandlerError> {
        self.call(&["apis", api], &request).await
    }
}

#[async_trait]
impl HttpProxyHandler for HttpWorkerHandlers {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HandlerError> {
        self.call(&["http"], &request).await
    }
}

#[async_trait]
impl ScheduleHandler for HttpWorkerHandlers {
    async fn handle(&self, tick: ScheduleTick) -> Result<Acknowledgement, HandlerError> {
        self.call(&["schedules"], &tick).await
    }
}

#[async_trait]
impl SubscriptionHandler for HttpWorkerHandlers {
    async fn handle(&self, message: TopicMessage) -> Result<Acknowledgement, HandlerError> {
        self.call(&["topics"], &message).await
    }
}

#[async_trait]
impl BucketHandler for HttpWorkerHandlers {
    async fn handle(&self, event: BlobEvent) -> Result<Acknowledgement, HandlerError> {
        self.call(&["buckets"], &event).await
    }
}

#[async_trait]
impl WebsocketHandler for HttpWorkerHandlers {
    async fn handle(&self, event: WebsocketEvent) -> Result<WebsocketReply, HandlerError> {
        self.call(&["websockets"], &event).await
    }
}
