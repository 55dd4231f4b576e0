//! Pull-based delivery: one event at a time from the function runtime API.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span};

use super::{Gateway, LifecycleError, LifecycleState, StateCell};
use crate::adapt::WireResponse;
use crate::dispatch::{DispatchContext, Dispatcher};
use crate::error::DispatchError;

pub const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
pub const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
pub const TRACE_ID_HEADER: &str = "Lambda-Runtime-Trace-Id";
const API_VERSION: &str = "2018-06-01";

/// One event handed out by the runtime.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub deadline: Option<Instant>,
    pub trace_id: Option<String>,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime api request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("runtime api replied {status} to {path}")]
    Status { status: u16, path: String },
    #[error("runtime api sent an invocation without a request id")]
    MissingRequestId,
}

/// Source of invocations and sink for their results.
#[async_trait]
pub trait InvocationSource: Send + Sync {
    /// Blocks until the next event; `None` once the runtime is finished.
    async fn next(&self) -> Result<Option<Invocation>, RuntimeError>;
    async fn respond(&self, request_id: &str, response: &WireResponse) -> Result<(), RuntimeError>;
    async fn fail(&self, request_id: &str, err: &DispatchError) -> Result<(), RuntimeError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReport<'a> {
    error_type: &'a str,
    error_message: &'a str,
}

/// HTTP client for the function runtime API.
pub struct LambdaRuntimeApi {
    client: reqwest::Client,
    base_url: String,
}

impl LambdaRuntimeApi {
    /// `endpoint` is the `host:port` found in `AWS_LAMBDA_RUNTIME_API`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{endpoint}/{API_VERSION}/runtime"),
        }
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: String,
        body: &B,
        error_type: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut request = self.client.post(format!("{}{path}", self.base_url)).json(body);
        if let Some(error_type) = error_type {
            request = request.header("Lambda-Runtime-Function-Error-Type", error_type);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                status: response.status().as_u16(),
                path,
            });
        }
        Ok(())
    }
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Converts an absolute epoch-millisecond deadline into a monotonic instant.
pub fn deadline_from_epoch_ms(deadline_ms: u64) -> Instant {
    let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms);
    let remaining = deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Instant::now() + remaining
}

#[async_trait]
impl InvocationSource for LambdaRuntimeApi {
    async fn next(&self) -> Result<Option<Invocation>, RuntimeError> {
        let path = "/invocation/next".to_string();
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        if response.status() == StatusCode::GONE {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                status: response.status().as_u16(),
                path,
            });
        }

        let request_id = header(&response, REQUEST_ID_HEADER)
            .ok_or(RuntimeError::MissingRequestId)?
            .to_string();
        let deadline = header(&response, DEADLINE_HEADER)
            .and_then(|v| v.parse::<u64>().ok())
            .map(deadline_from_epoch_ms);
        let trace_id = header(&response, TRACE_ID_HEADER).map(str::to_string);
        let payload = response.bytes().await?;
        Ok(Some(Invocation {
            request_id,
            deadline,
            trace_id,
            payload,
        }))
    }

    async fn respond(&self, request_id: &str, response: &WireResponse) -> Result<(), RuntimeError> {
        self.post(format!("/invocation/{request_id}/response"), response, None)
            .await
    }

    async fn fail(&self, request_id: &str, err: &DispatchError) -> Result<(), RuntimeError> {
        let report = ErrorReport {
            error_type: err.kind(),
            error_message: "event dispatch failed",
        };
        self.post(
            format!("/invocation/{request_id}/error"),
            &report,
            Some(err.kind()),
        )
        .await
    }
}

/// Pulls invocations one at a time and dispatches them.
///
/// A poll cannot be taken back once issued, so `stop` only marks the gateway
/// as draining and waits for the runtime to report that it is finished.
pub struct LambdaGateway {
    source: Arc<dyn InvocationSource>,
    dispatcher: Arc<Dispatcher>,
    state: StateCell,
}

impl LambdaGateway {
    pub fn new(source: Arc<dyn InvocationSource>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            source,
            dispatcher,
            state: StateCell::new(),
        }
    }

    async fn run(&self) -> Result<(), LifecycleError> {
        while let Some(invocation) = self.source.next().await? {
            if self.state.get() == LifecycleState::Draining {
                debug!(request_id = %invocation.request_id, "dispatching while draining");
            }
            self.handle(invocation).await?;
            membrane_telemetry::flush();
        }
        info!("runtime has no more invocations");
        Ok(())
    }

    async fn handle(&self, invocation: Invocation) -> Result<(), RuntimeError> {
        let span = info_span!("invocation", request_id = %invocation.request_id);
        async {
            let ctx = DispatchContext::new(invocation.request_id.clone())
                .with_trace_id(invocation.trace_id.clone())
                .with_deadline(invocation.deadline);

            let outcome = match serde_json::from_slice::<Value>(&invocation.payload) {
                Ok(envelope) => self.dispatcher.dispatch(&envelope, &ctx).await,
                Err(err) => Err(DispatchError::unsupported_with(
                    "invocation payload is not JSON",
                    err,
                )),
            };
            match outcome {
                Ok(response) => self.source.respond(&ctx.request_id, &response).await,
                Err(err) => {
                    debug!(kind = err.kind(), "reporting invocation error");
                    self.source.fail(&ctx.request_id, &err).await
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl Gateway for LambdaGateway {
    async fn start(&self) -> Result<(), LifecycleError> {
        self.state.begin()?;
        info!("runtime loop started");
        let result = self.run().await;
        if let Err(err) = &result {
            error!(error = %err, "runtime loop failed");
        }
        membrane_telemetry::flush();
        self.state.set(LifecycleState::Stopped);
        result
    }

    async fn stop(&self) {
        self.state.request_stop();
        self.state.wait_for(LifecycleState::Stopped).await;
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn past_deadlines_are_already_due() {
        let deadline = deadline_from_epoch_ms(1_000);
        assert!(deadline <= Instant::now());
    }

    #[tokio::test]
    async fn future_deadlines_keep_their_distance() {
        let in_a_minute = SystemTime::now() + Duration::from_secs(60);
        let ms = in_a_minute.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;
        let remaining = deadline_from_epoch_ms(ms) - Instant::now();
        assert!(remaining > Duration::from_secs(55));
        assert!(remaining <= Duration::from_secs(60));
    }
}
