//! Contracts for the components that run application logic.
//!
//! The gateway never executes application code itself; it hands each normalized
//! request to exactly one of these handlers and adapts whatever comes back.

use crate::types::{
    Acknowledgement, BlobEvent, HttpRequest, HttpResponse, ScheduleTick, TopicMessage,
    WebsocketEvent, WebsocketReply,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler transport failed: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("handler replied with status {status}")]
    Status { status: u16 },
    #[error("failed to encode handler request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode handler reply: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Declared-route APIs, keyed by their logical name.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    async fn handle(&self, api: &str, request: HttpRequest) -> Result<HttpResponse, HandlerError>;
}

/// Transparent HTTP proxy; the request path is forwarded untouched.
#[async_trait]
pub trait HttpProxyHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HandlerError>;
}

#[async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn handle(&self, tick: ScheduleTick) -> Result<Acknowledgement, HandlerError>;
}

#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn handle(&self, message: TopicMessage) -> Result<Acknowledgement, HandlerError>;
}

#[async_trait]
pub trait BucketHandler: Send + Sync {
    async fn handle(&self, event: BlobEvent) -> Result<Acknowledgement, HandlerError>;
}

#[async_trait]
pub trait WebsocketHandler: Send + Sync {
    async fn handle(&self, event: WebsocketEvent) -> Result<WebsocketReply, HandlerError>;
}

/// One handler per capability, shared by every event the gateway dispatches.
#[derive(Clone)]
pub struct Handlers {
    pub api: Arc<dyn ApiHandler>,
    pub http: Arc<dyn HttpProxyHandler>,
    pub schedule: Arc<dyn ScheduleHandler>,
    pub subscription: Arc<dyn SubscriptionHandler>,
    pub bucket: Arc<dyn BucketHandler>,
    pub websocket: Arc<dyn WebsocketHandler>,
}

impl Handlers {
    /// Uses a single implementation for every capability.
    pub fn uniform<T>(handler: Arc<T>) -> Self
    where
        T: ApiHandler
            + HttpProxyHandler
            + ScheduleHandler
            + SubscriptionHandler
            + BucketHandler
            + WebsocketHandler
            + 'static,
    {
        Self {
            api: handler.clone(),
            http: handler.clone(),
            schedule: handler.clone(),
            subscription: handler.clone(),
            bucket: handler.clone(),
            websocket: handler,
        }
    }
}
