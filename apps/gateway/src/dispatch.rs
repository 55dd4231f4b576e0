use membrane_core::{Handlers, HttpRequest};
use membrane_resources::{ApiMode, ResourceError, ResourceIndex};
use membrane_telemetry::{EVENTS_TOTAL, TelemetryLabels, record_counter, with_common_fields};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, field, info_span, warn};
use uuid::Uuid;

use crate::adapt::{Framing, HealthStatus, HttpReply, WireResponse, http_failure, settle};
use crate::classify::{Shape, classify};
use crate::envelope::{
    HttpEnvelope, RecordBatch, S3Record, ScheduleEnvelope, SnsRecord, WebsocketEnvelope, decode,
};
use crate::error::DispatchError;
use crate::normalize;

/// Per-invocation values threaded through dispatch.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub request_id: String,
    pub trace_id: Option<String>,
    /// Bounds resource discovery; handler calls are not cancelled.
    pub deadline: Option<Instant>,
}

impl DispatchContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            trace_id: None,
            deadline: None,
        }
    }

    pub fn generated() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Routes classified envelopes to their capability handler and adapts the result.
pub struct Dispatcher {
    index: Arc<ResourceIndex>,
    handlers: Handlers,
    framing: Framing,
}

impl Dispatcher {
    pub fn new(index: Arc<ResourceIndex>, handlers: Handlers) -> Self {
        Self {
            index,
            handlers,
            framing: Framing::LAMBDA,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn index(&self) -> &Arc<ResourceIndex> {
        &self.index
    }

    /// Handles one raw envelope.
    ///
    /// HTTP and websocket failures are folded into their wire response, so an
    /// `Err` is only returned for shapes whose delivery runtime expects the
    /// whole call to fail (batches, schedules, unrecognized envelopes).
    pub async fn dispatch(
        &self,
        envelope: &Value,
        ctx: &DispatchContext,
    ) -> Result<WireResponse, DispatchError> {
        let shape = classify(envelope);
        let span = info_span!(
            "dispatch",
            shape = %shape,
            request_id = field::Empty,
            trace_id = field::Empty
        );
        with_common_fields(&span, &ctx.request_id, ctx.trace_id.as_deref());

        async move {
            let result = self.route(shape, envelope, ctx).await;
            let outcome = match &result {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            };
            record_counter(
                EVENTS_TOTAL,
                1,
                &TelemetryLabels::new().shape(shape.as_str()).outcome(outcome),
            );

            let err = match result {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if let DispatchError::UnsupportedEvent { .. } = err {
                warn!(error = %err, envelope = %envelope, "unsupported event");
            } else {
                error!(error = %err, kind = err.kind(), "event dispatch failed");
            }
            match shape {
                Shape::Http => Ok(WireResponse::Http(
                    http_failure(&err).into_proxy_response(self.framing),
                )),
                Shape::Websocket => Ok(WireResponse::websocket(websocket_failure(&err))),
                _ => Err(err),
            }
        }
        .instrument(span)
        .await
    }

    /// Serves a request that arrived directly over HTTP rather than inside an
    /// envelope. It always goes to the proxy handler.
    pub async fn dispatch_proxy(&self, request: HttpRequest, ctx: &DispatchContext) -> HttpReply {
        let span = info_span!(
            "dispatch",
            shape = %Shape::Http,
            request_id = field::Empty,
            trace_id = field::Empty
        );
        with_common_fields(&span, &ctx.request_id, ctx.trace_id.as_deref());
        async move {
            let result = self
                .handlers
                .http
                .handle(request)
                .await
                .map_err(DispatchError::from);
            let outcome = result.as_ref().map_or_else(|e| e.kind(), |_| "ok");
            record_counter(
                EVENTS_TOTAL,
                1,
                &TelemetryLabels::new()
                    .shape(Shape::Http.as_str())
                    .outcome(outcome),
            );
            match result {
                Ok(response) => HttpReply::from_handler(response),
                Err(err) => {
                    error!(error = %err, "proxy request failed");
                    http_failure(&err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn route(
        &self,
        shape: Shape,
        envelope: &Value,
        ctx: &DispatchContext,
    ) -> Result<WireResponse, DispatchError> {
        match shape {
            Shape::HealthProbe => Ok(WireResponse::Health(HealthStatus::HEALTHY)),
            Shape::Http => self.http(decode_as(envelope, "http")?, ctx).await,
            Shape::Websocket => self.websocket(decode_as(envelope, "websocket")?, ctx).await,
            Shape::PubSub => self.topics(decode_as(envelope, "pub/sub")?, ctx).await,
            Shape::Blob => self.buckets(decode_as(envelope, "storage")?, ctx).await,
            Shape::Schedule => self.schedule(decode_as(envelope, "schedule")?).await,
            Shape::Unrecognized => Err(DispatchError::unsupported(
                "envelope matches no known shape",
            )),
        }
    }

    async fn http(
        &self,
        envelope: HttpEnvelope,
        ctx: &DispatchContext,
    ) -> Result<WireResponse, DispatchError> {
        let target = self
            .index
            .snapshot(ctx.deadline)
            .await?
            .api_by_id(&envelope.request_context.api_id)?;
        let request = normalize::http_request(&envelope)?;
        debug!(api = %target.name, method = %request.method, path = %request.path, "routing http request");

        let response = match target.mode {
            ApiMode::Proxy => self.handlers.http.handle(request).await?,
            ApiMode::DeclaredRoutes => self.handlers.api.handle(&target.name, request).await?,
        };
        settle(Shape::Http, 0, response.into(), self.framing)
    }

    async fn websocket(
        &self,
        envelope: WebsocketEnvelope,
        ctx: &DispatchContext,
    ) -> Result<WireResponse, DispatchError> {
        let target = self
            .index
            .snapshot(ctx.deadline)
            .await?
            .api_by_id(&envelope.request_context.api_id)?;
        let event = normalize::websocket_event(&envelope, target.name)?;
        let reply = self.handlers.websocket.handle(event).await?;

        let status = if reply.rejected {
            401
        } else if !reply.ack.success {
            500
        } else {
            200
        };
        Ok(WireResponse::websocket(status))
    }

    /// Records are decoded one at a time, so a malformed record fails only
    /// itself and the records after it.
    async fn topics(
        &self,
        batch: RecordBatch<Value>,
        ctx: &DispatchContext,
    ) -> Result<WireResponse, DispatchError> {
        for (index, raw) in batch.records.iter().enumerate() {
            let record: SnsRecord = decode_as(raw, "pub/sub record")?;
            let snapshot = self.index.snapshot(ctx.deadline).await?;
            let topic = snapshot.logical_name(&record.sns.topic_arn)?;
            let message = normalize::topic_message(&record.sns, topic.to_string())?;
            let ack = self.handlers.subscription.handle(message).await?;
            settle(Shape::PubSub, index, ack.into(), self.framing)?;
        }
        Ok(WireResponse::Accepted)
    }

    async fn buckets(
        &self,
        batch: RecordBatch<Value>,
        ctx: &DispatchContext,
    ) -> Result<WireResponse, DispatchError> {
        for (index, raw) in batch.records.iter().enumerate() {
            let record: S3Record = decode_as(raw, "storage record")?;
            let snapshot = self.index.snapshot(ctx.deadline).await?;
            let bucket = snapshot.logical_name(&record.s3.bucket.provider_id())?;
            let event = normalize::blob_event(&record, bucket.to_string())?;
            let ack = self.handlers.bucket.handle(event).await?;
            settle(Shape::Blob, index, ack.into(), self.framing)?;
        }
        Ok(WireResponse::Accepted)
    }

    async fn schedule(&self, envelope: ScheduleEnvelope) -> Result<WireResponse, DispatchError> {
        let tick = normalize::schedule_tick(envelope);
        let ack = self.handlers.schedule.handle(tick).await?;
        settle(Shape::Schedule, 0, ack.into(), self.framing)
    }
}

fn decode_as<T: DeserializeOwned>(envelope: &Value, what: &str) -> Result<T, DispatchError> {
    decode(envelope)
        .map_err(|err| DispatchError::unsupported_with(format!("malformed {what} envelope"), err))
}

fn websocket_failure(err: &DispatchError) -> u16 {
    match err {
        DispatchError::Resource(ResourceError::NotFound { .. }) => 404,
        _ => 500,
    }
}
