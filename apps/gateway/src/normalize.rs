//! Per-shape conversion from decoded envelopes to normalized requests.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use membrane_core::{
    BlobEvent, BlobEventType, HttpRequest, MultiMap, ScheduleTick, TopicMessage, WebsocketEvent,
    WebsocketEventKind, push_value,
};
use std::collections::BTreeMap;

use crate::envelope::{HttpEnvelope, S3Record, ScheduleEnvelope, SnsEntity, WebsocketEnvelope};
use crate::error::DispatchError;

/// Header that carries the original `host` value downstream.
pub const FORWARDED_HOST_HEADER: &str = "X-Forwarded-For";
pub const CONNECT_ROUTE: &str = "$connect";
pub const DISCONNECT_ROUTE: &str = "$disconnect";

/// Appends a header, rewriting `host` so it is never forwarded as-is.
pub fn forward_header(headers: &mut MultiMap, name: &str, value: &str) {
    if name.eq_ignore_ascii_case("host") {
        push_value(headers, FORWARDED_HOST_HEADER, value);
    } else {
        push_value(headers, name, value);
    }
}

pub fn parse_query(raw: &str) -> MultiMap {
    let mut query = MultiMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        push_value(&mut query, key, value);
    }
    query
}

fn query_params(
    raw: &str,
    multi: &BTreeMap<String, Vec<String>>,
    single: &BTreeMap<String, String>,
) -> MultiMap {
    if !raw.is_empty() {
        return parse_query(raw);
    }
    if !multi.is_empty() {
        return multi.clone();
    }
    single
        .iter()
        .map(|(k, v)| (k.clone(), vec![v.clone()]))
        .collect()
}

fn body_bytes(body: &str, base64_encoded: bool) -> Result<Bytes, DispatchError> {
    if base64_encoded {
        STANDARD
            .decode(body)
            .map(Bytes::from)
            .map_err(|source| DispatchError::Decode {
                what: "body",
                source,
            })
    } else {
        Ok(Bytes::copy_from_slice(body.as_bytes()))
    }
}

pub fn http_request(envelope: &HttpEnvelope) -> Result<HttpRequest, DispatchError> {
    let mut headers = MultiMap::new();
    // Format 1.0 repeats every header in both maps.
    if envelope.multi_value_headers.is_empty() {
        for (name, value) in &envelope.headers {
            forward_header(&mut headers, name, value);
        }
    } else {
        for (name, values) in &envelope.multi_value_headers {
            for value in values {
                forward_header(&mut headers, name, value);
            }
        }
    }
    for cookie in &envelope.cookies {
        push_value(&mut headers, "Cookie", cookie.as_str());
    }

    Ok(HttpRequest {
        method: envelope.method().to_string(),
        path: envelope.path().to_string(),
        path_params: envelope.path_parameters.clone(),
        query_params: query_params(
            &envelope.raw_query_string,
            &envelope.multi_value_query_string_parameters,
            &envelope.query_string_parameters,
        ),
        headers,
        body: body_bytes(&envelope.body, envelope.is_base64_encoded)?,
    })
}

/// Unwraps the base64 transport framing; the inner message stays opaque.
pub fn topic_message(entity: &SnsEntity, topic_name: String) -> Result<TopicMessage, DispatchError> {
    let message = STANDARD
        .decode(entity.message.as_bytes())
        .map_err(|source| DispatchError::Decode {
            what: "message",
            source,
        })?;
    Ok(TopicMessage {
        topic_name,
        message: Bytes::from(message),
        attributes: entity.string_attributes(),
    })
}

pub fn blob_event_type(event_name: &str) -> Result<BlobEventType, DispatchError> {
    if event_name.contains("ObjectCreated:") {
        Ok(BlobEventType::Created)
    } else if event_name.contains("ObjectRemoved:") {
        Ok(BlobEventType::Deleted)
    } else {
        Err(DispatchError::unsupported(format!(
            "blob event {event_name:?} is neither ObjectCreated nor ObjectRemoved"
        )))
    }
}

/// Object keys arrive form-encoded (`+` for spaces).
pub fn object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .unwrap_or(spaced)
}

pub fn blob_event(record: &S3Record, bucket_name: String) -> Result<BlobEvent, DispatchError> {
    Ok(BlobEvent {
        bucket_name,
        event_type: blob_event_type(&record.event_name)?,
        key: object_key(&record.s3.object.key),
    })
}

pub fn schedule_tick(envelope: ScheduleEnvelope) -> ScheduleTick {
    ScheduleTick {
        schedule_name: envelope.schedule,
    }
}

pub fn websocket_event(
    envelope: &WebsocketEnvelope,
    socket_name: String,
) -> Result<WebsocketEvent, DispatchError> {
    let kind = match envelope.request_context.route_key.as_str() {
        CONNECT_ROUTE => WebsocketEventKind::Connect {
            query_params: query_params(
                "",
                &envelope.multi_value_query_string_parameters,
                &envelope.query_string_parameters,
            ),
        },
        DISCONNECT_ROUTE => WebsocketEventKind::Disconnect,
        _ => WebsocketEventKind::Message {
            body: body_bytes(&envelope.body, envelope.is_base64_encoded)?,
        },
    };
    Ok(WebsocketEvent {
        connection_id: envelope.request_context.connection_id.clone(),
        socket_name,
        kind,
    })
}
