//! Typed views of the delivery runtime's envelopes.
//!
//! Envelopes are classified on the raw JSON first and only then decoded into
//! one of these structs, so every field here is optional on the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Treats an explicit `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn decode<T: DeserializeOwned>(envelope: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(envelope)
}

/// Proxy-integration HTTP request (payload formats 1.0 and 2.0).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpEnvelope {
    #[serde(deserialize_with = "nullable")]
    pub route_key: String,
    #[serde(deserialize_with = "nullable")]
    pub raw_path: String,
    #[serde(deserialize_with = "nullable")]
    pub path: String,
    #[serde(deserialize_with = "nullable")]
    pub raw_query_string: String,
    #[serde(deserialize_with = "nullable")]
    pub method: String,
    #[serde(deserialize_with = "nullable")]
    pub http_method: String,
    #[serde(deserialize_with = "nullable")]
    pub cookies: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub headers: BTreeMap<String, String>,
    #[serde(deserialize_with = "nullable")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    #[serde(deserialize_with = "nullable")]
    pub query_string_parameters: BTreeMap<String, String>,
    #[serde(deserialize_with = "nullable")]
    pub multi_value_query_string_parameters: BTreeMap<String, Vec<String>>,
    #[serde(deserialize_with = "nullable")]
    pub path_parameters: BTreeMap<String, String>,
    #[serde(deserialize_with = "nullable")]
    pub body: String,
    #[serde(deserialize_with = "nullable")]
    pub is_base64_encoded: bool,
    #[serde(deserialize_with = "nullable")]
    pub request_context: HttpRequestContext,
}

impl HttpEnvelope {
    pub fn method(&self) -> &str {
        let from_context = self.request_context.http.method.as_str();
        [from_context, self.method.as_str(), self.http_method.as_str()]
            .into_iter()
            .find(|m| !m.is_empty())
            .unwrap_or("GET")
    }

    pub fn path(&self) -> &str {
        if self.raw_path.is_empty() {
            &self.path
        } else {
            &self.raw_path
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRequestContext {
    #[serde(deserialize_with = "nullable")]
    pub api_id: String,
    #[serde(deserialize_with = "nullable")]
    pub http: HttpDescription,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpDescription {
    #[serde(deserialize_with = "nullable")]
    pub method: String,
    #[serde(deserialize_with = "nullable")]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsocketEnvelope {
    #[serde(deserialize_with = "nullable")]
    pub request_context: WebsocketRequestContext,
    #[serde(deserialize_with = "nullable")]
    pub body: String,
    #[serde(deserialize_with = "nullable")]
    pub is_base64_encoded: bool,
    #[serde(deserialize_with = "nullable")]
    pub query_string_parameters: BTreeMap<String, String>,
    #[serde(deserialize_with = "nullable")]
    pub multi_value_query_string_parameters: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsocketRequestContext {
    #[serde(deserialize_with = "nullable")]
    pub connection_id: String,
    #[serde(deserialize_with = "nullable")]
    pub route_key: String,
    #[serde(deserialize_with = "nullable")]
    pub api_id: String,
}

/// A `Records` batch as delivered by pub/sub and storage notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordBatch<R> {
    #[serde(rename = "Records", alias = "records")]
    pub records: Vec<R>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnsRecord {
    #[serde(rename = "EventSource", alias = "eventSource", default)]
    pub event_source: String,
    #[serde(rename = "Sns", alias = "sns")]
    pub sns: SnsEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnsEntity {
    #[serde(rename = "TopicArn")]
    pub topic_arn: String,
    #[serde(rename = "Message", default, deserialize_with = "nullable")]
    pub message: String,
    #[serde(rename = "MessageAttributes", default, deserialize_with = "nullable")]
    pub message_attributes: BTreeMap<String, Value>,
}

impl SnsEntity {
    /// String-valued attributes. Values arrive either bare or as
    /// `{"Type": "String", "Value": ...}`; other types are skipped.
    pub fn string_attributes(&self) -> BTreeMap<String, String> {
        self.message_attributes
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(obj) => {
                        let kind = obj.get("Type").and_then(Value::as_str).unwrap_or("String");
                        (kind == "String")
                            .then(|| obj.get("Value").and_then(Value::as_str))
                            .flatten()
                            .map(str::to_string)
                    }
                    _ => None,
                };
                text.map(|t| (key.clone(), t))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Record {
    #[serde(alias = "EventSource", default)]
    pub event_source: String,
    #[serde(default)]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arn: String,
}

impl S3Bucket {
    /// Bucket identifier, derived from the name when the record omits it.
    pub fn provider_id(&self) -> String {
        if self.arn.is_empty() {
            format!("arn:aws:s3:::{}", self.name)
        } else {
            self.arn.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEnvelope {
    #[serde(rename = "x-membrane-schedule")]
    pub schedule: String,
}
