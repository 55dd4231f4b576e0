//! Push-based delivery: an HTTP listener that serves proxy traffic directly and
//! accepts raw envelopes on a local invoke endpoint.

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Extension, Request},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use membrane_core::{HttpRequest, MultiMap};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use super::{Gateway, LifecycleError, LifecycleState, StateCell};
use crate::adapt::{HealthStatus, HttpReply};
use crate::dispatch::{DispatchContext, Dispatcher};
use crate::error::DispatchError;
use crate::normalize::{forward_header, parse_query};

pub const INVOKE_PATH: &str = "/__membrane/invoke";
pub const HEALTH_PATH: &str = "/__membrane/health";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id assigned by [`with_request_id`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Reuses the caller's `x-request-id` when present, otherwise mints one, and
/// echoes it on the response.
pub async fn with_request_id(mut req: Request<Body>, next: Next) -> Response {
    let rid = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(rid.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&rid) {
        res.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    res
}

pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(INVOKE_PATH, post(invoke))
        .route(HEALTH_PATH, get(health))
        .fallback(proxy)
        .layer(middleware::from_fn(with_request_id))
        .layer(Extension(dispatcher))
}

async fn health() -> impl IntoResponse {
    axum::Json(HealthStatus::HEALTHY)
}

async fn invoke(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Extension(RequestId(rid)): Extension<RequestId>,
    body: Bytes,
) -> Response {
    let ctx = DispatchContext::new(rid);
    let outcome = match serde_json::from_slice::<Value>(&body) {
        Ok(envelope) => dispatcher.dispatch(&envelope, &ctx).await,
        Err(err) => Err(DispatchError::unsupported_with(
            "invoke payload is not JSON",
            err,
        )),
    };
    match outcome {
        Ok(response) => axum::Json(response).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({
                "errorType": err.kind(),
                "errorMessage": "event dispatch failed",
            })),
        )
            .into_response(),
    }
}

async fn proxy(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Extension(RequestId(rid)): Extension<RequestId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = proxy_request(&method, &uri, &headers, body);
    let reply = dispatcher
        .dispatch_proxy(request, &DispatchContext::new(rid))
        .await;
    into_response(reply)
}

/// Builds the normalized request for traffic that reached the listener directly.
pub fn proxy_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> HttpRequest {
    let mut forwarded = MultiMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        forward_header(&mut forwarded, name.as_str(), &value);
    }
    HttpRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        path_params: Default::default(),
        query_params: uri.query().map(parse_query).unwrap_or_default(),
        headers: forwarded,
        body,
    }
}

fn into_response(reply: HttpReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, reply.body).into_response();
    let headers = response.headers_mut();
    headers.remove(header::CONTENT_TYPE);
    for (name, value) in reply.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }
    response
}

/// HTTP listener bound at construction so callers can learn its address.
pub struct HttpGateway {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    state: StateCell,
}

impl HttpGateway {
    pub async fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> Result<Self, LifecycleError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            dispatcher,
            state: StateCell::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn start(&self) -> Result<(), LifecycleError> {
        self.state.begin()?;
        let Some(listener) = self.listener.lock().await.take() else {
            self.state.set(LifecycleState::Stopped);
            return Err(LifecycleError::AlreadyStarted);
        };
        info!(addr = %self.local_addr, "http listener started");

        let mut state = self.state.subscribe();
        let result = axum::serve(listener, build_router(self.dispatcher.clone()))
            .with_graceful_shutdown(async move {
                let _ = state.wait_for(|s| *s == LifecycleState::Draining).await;
            })
            .await;
        if let Err(err) = &result {
            error!(error = %err, "http listener failed");
        }
        info!("http listener stopped");
        membrane_telemetry::flush();
        self.state.set(LifecycleState::Stopped);
        result.map_err(LifecycleError::from)
    }

    async fn stop(&self) {
        self.state.request_stop();
        self.state.wait_for(LifecycleState::Stopped).await;
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }
}
