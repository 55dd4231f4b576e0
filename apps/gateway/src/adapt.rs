//! Converts handler results into the wire responses the delivery runtime expects.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use membrane_core::{HttpResponse, NormalizedResponse};
use membrane_resources::ResourceError;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classify::Shape;
use crate::error::DispatchError;

/// How HTTP replies are framed for the transport that carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Encode the body as base64 and set `isBase64Encoded`.
    pub base64_body: bool,
    /// Keep every header value instead of only the first.
    pub repeated_headers: bool,
}

impl Framing {
    /// Proxy-integration responses returned through the invocation runtime.
    pub const LAMBDA: Framing = Framing {
        base64_body: true,
        repeated_headers: false,
    };
    /// Direct HTTP serving, where bytes and repeated headers pass through.
    pub const PASSTHROUGH: Framing = Framing {
        base64_body: false,
        repeated_headers: true,
    };
}

/// An HTTP reply ready to be written by either transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpReply {
    pub fn plain(status: u16, body: &'static str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "text/plain; charset=utf-8".into())],
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    /// Flattens a handler response. `Content-Length` is dropped since the
    /// transport recomputes it after any re-encoding.
    pub fn from_handler(response: HttpResponse) -> Self {
        let headers = response
            .headers
            .into_iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("content-length"))
            .flat_map(|(name, values)| values.into_iter().map(move |v| (name.clone(), v)))
            .collect();
        Self {
            status: response.status,
            headers,
            body: response.body,
        }
    }

    pub fn into_proxy_response(self, framing: Framing) -> ProxyResponse {
        let mut headers = BTreeMap::new();
        let mut multi_value_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in self.headers {
            if framing.repeated_headers {
                multi_value_headers
                    .entry(name.clone())
                    .or_default()
                    .push(value.clone());
            }
            headers.entry(name).or_insert(value);
        }
        let (body, is_base64_encoded) = if framing.base64_body {
            (STANDARD.encode(&self.body), true)
        } else {
            (String::from_utf8_lossy(&self.body).into_owned(), false)
        };
        ProxyResponse {
            status_code: self.status,
            headers,
            multi_value_headers,
            body,
            is_base64_encoded,
        }
    }
}

/// Maps a failed HTTP dispatch to the status the caller sees. Error details
/// stay in the logs.
pub fn http_failure(err: &DispatchError) -> HttpReply {
    match err {
        DispatchError::Resource(ResourceError::NotFound { .. }) => {
            HttpReply::plain(404, "Not Found")
        }
        DispatchError::Decode { .. } | DispatchError::UnsupportedEvent { .. } => {
            HttpReply::plain(400, "Bad Request")
        }
        _ => HttpReply::plain(500, "Internal Server Error"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketWireResponse {
    pub status_code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
}

impl HealthStatus {
    pub const HEALTHY: HealthStatus = HealthStatus { healthy: true };
}

/// The value returned to the delivery runtime for one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WireResponse {
    Http(ProxyResponse),
    Websocket(WebsocketWireResponse),
    Health(HealthStatus),
    /// Event-style shapes acknowledge with an empty (null) payload.
    Accepted,
}

impl WireResponse {
    pub fn websocket(status_code: u16) -> Self {
        WireResponse::Websocket(WebsocketWireResponse { status_code })
    }
}

/// Adapts one handler result. A negative acknowledgement fails the event so the
/// runtime redelivers it; `index` is the record position within its batch.
pub fn settle(
    shape: Shape,
    index: usize,
    response: NormalizedResponse,
    framing: Framing,
) -> Result<WireResponse, DispatchError> {
    match response {
        NormalizedResponse::Http(response) => Ok(WireResponse::Http(
            HttpReply::from_handler(response).into_proxy_response(framing),
        )),
        NormalizedResponse::Ack(ack) if ack.success => Ok(WireResponse::Accepted),
        NormalizedResponse::Ack(_) => Err(DispatchError::Rejected { shape, index }),
    }
}
