use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use membrane_core::testkit::{RecordingHandlers, assert_json_eq_stable, load_fixture};
use membrane_core::{
    BlobEvent, BlobEventType, HttpResponse, NormalizedRequest, ScheduleTick, WebsocketEventKind,
};
use membrane_gateway::adapt::ProxyResponse;
use membrane_gateway::{DispatchContext, DispatchError, Dispatcher, WireResponse};
use membrane_resources::{
    DiscoveryTag, InMemoryInventory, ResourceError, ResourceIndex, TaggedResource,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing_test::traced_test;

const NAME: &str = "x-membrane-name";
const TYPE: &str = "x-membrane-type";

fn fixture(name: &str) -> Value {
    load_fixture(format!("apps/gateway/tests/fixtures/{name}.json"))
}

fn deployment() -> Vec<Vec<TaggedResource>> {
    vec![
        vec![
            TaggedResource::new(
                "arn:aws:apigateway:us-east-1::/apis/a1b2c3",
                [(NAME, "items-api")],
            ),
            TaggedResource::new(
                "arn:aws:apigateway:us-east-1::/apis/p9q8r7",
                [(NAME, "site"), (TYPE, "http-proxy")],
            ),
            TaggedResource::new(
                "arn:aws:apigateway:us-east-1::/apis/w5s4k3",
                [(NAME, "chat")],
            ),
        ],
        vec![
            TaggedResource::new(
                "arn:aws:sns:us-east-1:123456789012:orders-a1",
                [(NAME, "orders")],
            ),
            TaggedResource::new("arn:aws:s3:::images-x7", [(NAME, "images")]),
            TaggedResource::new("arn:aws:sqs:us-east-1:123456789012:untagged-q", [("team", "x")]),
        ],
    ]
}

struct Harness {
    inventory: Arc<InMemoryInventory>,
    handlers: Arc<RecordingHandlers>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(handlers: RecordingHandlers) -> Self {
        let inventory = Arc::new(InMemoryInventory::new(deployment()));
        let index = Arc::new(ResourceIndex::new(inventory.clone(), DiscoveryTag::default()));
        let handlers = Arc::new(handlers);
        let dispatcher = Dispatcher::new(index, handlers.into_handlers());
        Self {
            inventory,
            handlers,
            dispatcher,
        }
    }

    async fn dispatch(&self, envelope: &Value) -> Result<WireResponse, DispatchError> {
        self.dispatcher
            .dispatch(envelope, &DispatchContext::new("req-1"))
            .await
    }
}

fn proxy_response(response: WireResponse) -> ProxyResponse {
    match response {
        WireResponse::Http(inner) => inner,
        other => panic!("expected an http response, got {other:?}"),
    }
}

fn decoded_body(response: &ProxyResponse) -> Vec<u8> {
    assert!(response.is_base64_encoded);
    STANDARD.decode(&response.body).unwrap()
}

#[tokio::test]
async fn http_request_reaches_the_declared_api() {
    let harness = Harness::new(RecordingHandlers::new());
    let response = proxy_response(harness.dispatch(&fixture("http_api")).await.unwrap());
    assert_eq!(response.status_code, 200);

    let deliveries = harness.handlers.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].api.as_deref(), Some("items-api"));
    let NormalizedRequest::Http(request) = &deliveries[0].request else {
        panic!("expected http delivery");
    };
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/items/42");
    assert_eq!(request.path_params["id"], "42");
    assert_eq!(request.headers["X-Forwarded-For"], vec!["x"]);
    assert!(!request.headers.contains_key("host"));
    assert!(request.query_params.is_empty());
    assert!(request.body.is_empty());
}

#[tokio::test]
async fn binary_bodies_survive_the_round_trip() {
    let harness = Harness::new(RecordingHandlers::new());
    let response = proxy_response(harness.dispatch(&fixture("http_base64")).await.unwrap());

    let deliveries = harness.handlers.deliveries().await;
    let NormalizedRequest::Http(request) = &deliveries[0].request else {
        panic!("expected http delivery");
    };
    assert_eq!(request.body.as_ref(), &[0u8, 1, 2, 255]);
    assert_eq!(response.body, "AAEC/w==");
    assert_eq!(decoded_body(&response), vec![0u8, 1, 2, 255]);
}

#[tokio::test]
async fn proxy_apis_go_to_the_http_handler_untouched() {
    let harness = Harness::new(RecordingHandlers::new());
    harness.dispatch(&fixture("http_proxy")).await.unwrap();

    let deliveries = harness.handlers.deliveries().await;
    assert_eq!(deliveries[0].api, None);
    let NormalizedRequest::Http(request) = &deliveries[0].request else {
        panic!("expected http delivery");
    };
    assert_eq!(request.path, "/static/app.js");
    assert_eq!(request.query_params["v"], vec!["3", "4"]);
    assert_eq!(request.headers["Cookie"], vec!["session=abc", "theme=dark"]);
    assert_eq!(request.headers["X-Forwarded-For"], vec!["cdn.example.test"]);
}

#[tokio::test]
async fn handler_responses_are_framed_for_the_runtime() {
    let reply = HttpResponse::new(404, "no such item")
        .with_header("Content-Type", "text/plain")
        .with_header("Content-Length", "12");
    let harness = Harness::new(RecordingHandlers::new().with_http_response(reply));
    let response = harness.dispatch(&fixture("http_api")).await.unwrap();

    assert_json_eq_stable(
        &serde_json::to_value(&response).unwrap(),
        &json!({
            "statusCode": 404,
            "headers": {"Content-Type": "text/plain"},
            "body": STANDARD.encode("no such item"),
            "isBase64Encoded": true,
        }),
    );
}

#[tokio::test]
#[traced_test]
async fn handler_errors_become_a_generic_500() {
    let harness = Harness::new(RecordingHandlers::new().fail_when(|_| true));
    let response = proxy_response(harness.dispatch(&fixture("http_api")).await.unwrap());

    assert_eq!(response.status_code, 500);
    assert_eq!(decoded_body(&response), b"Internal Server Error");
    assert!(logs_contain("recording handler configured to fail"));
}

#[tokio::test]
async fn unknown_apis_answer_404_without_a_delivery() {
    let harness = Harness::new(RecordingHandlers::new());
    let mut envelope = fixture("http_api");
    envelope["requestContext"]["apiId"] = json!("zzz999");

    let response = proxy_response(harness.dispatch(&envelope).await.unwrap());
    assert_eq!(response.status_code, 404);
    assert!(harness.handlers.deliveries().await.is_empty());
}

#[tokio::test]
async fn malformed_base64_bodies_answer_400() {
    let harness = Harness::new(RecordingHandlers::new());
    let mut envelope = fixture("http_base64");
    envelope["body"] = json!("not*base64");

    let response = proxy_response(harness.dispatch(&envelope).await.unwrap());
    assert_eq!(response.status_code, 400);
    assert!(harness.handlers.deliveries().await.is_empty());
}

#[tokio::test]
async fn discovery_failures_are_retried_on_the_next_event() {
    let harness = Harness::new(RecordingHandlers::new());
    harness.inventory.fail_on_call(1).await;

    let first = proxy_response(harness.dispatch(&fixture("http_api")).await.unwrap());
    assert_eq!(first.status_code, 500);

    let second = proxy_response(harness.dispatch(&fixture("http_api")).await.unwrap());
    assert_eq!(second.status_code, 200);
    assert_eq!(harness.handlers.deliveries().await.len(), 1);
}

#[tokio::test]
async fn storage_notifications_resolve_the_bucket() {
    let harness = Harness::new(RecordingHandlers::new());
    let response = harness.dispatch(&fixture("s3_put")).await.unwrap();
    assert_eq!(response, WireResponse::Accepted);

    let deliveries = harness.handlers.deliveries().await;
    assert_eq!(
        deliveries[0].request,
        NormalizedRequest::Blob(BlobEvent {
            bucket_name: "images".into(),
            key: "a/b.txt".into(),
            event_type: BlobEventType::Created,
        })
    );
}

#[tokio::test]
async fn unknown_storage_event_names_are_rejected() {
    let harness = Harness::new(RecordingHandlers::new());
    let mut envelope = fixture("s3_put");
    envelope["Records"][0]["eventName"] = json!("ObjectRestore:Completed");

    let err = harness.dispatch(&envelope).await.unwrap_err();
    assert!(matches!(err, DispatchError::UnsupportedEvent { .. }));
    assert!(harness.handlers.deliveries().await.is_empty());
}

#[tokio::test]
async fn batch_stops_at_the_first_failing_record() {
    let harness = Harness::new(RecordingHandlers::new());
    let err = harness.dispatch(&fixture("sns_batch")).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Resource(ResourceError::NotFound { .. })
    ));

    let deliveries = harness.handlers.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    let NormalizedRequest::Topic(message) = &deliveries[0].request else {
        panic!("expected topic delivery");
    };
    assert_eq!(message.topic_name, "orders");
    assert_eq!(message.message.as_ref(), b"first");
    assert_eq!(message.attributes["origin"], "checkout");
    assert_eq!(harness.inventory.calls(), 2);
}

#[tokio::test]
async fn malformed_records_keep_the_deliveries_before_them() {
    let harness = Harness::new(RecordingHandlers::new());
    let mut envelope = fixture("sns_batch");
    let records = envelope["Records"].as_array_mut().unwrap();
    records[1]["Sns"].as_object_mut().unwrap().remove("TopicArn");

    let err = harness.dispatch(&envelope).await.unwrap_err();
    assert_eq!(err.kind(), "unsupported_event");

    let deliveries = harness.handlers.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    let NormalizedRequest::Topic(message) = &deliveries[0].request else {
        panic!("expected topic delivery");
    };
    assert_eq!(message.message.as_ref(), b"first");
}

#[tokio::test]
async fn storage_batches_stop_at_a_foreign_record() {
    let harness = Harness::new(RecordingHandlers::new());
    let mut envelope = fixture("s3_put");
    let first = envelope["Records"][0].clone();
    let records = envelope["Records"].as_array_mut().unwrap();
    records.push(json!({"EventSource": "aws:sns", "Sns": {"Message": ""}}));
    records.push(first);

    let err = harness.dispatch(&envelope).await.unwrap_err();
    assert_eq!(err.kind(), "unsupported_event");
    assert_eq!(harness.handlers.deliveries().await.len(), 1);
}

#[tokio::test]
async fn negative_acknowledgements_fail_the_batch() {
    let harness = Harness::new(
        RecordingHandlers::new().nack_when(|req| matches!(req, NormalizedRequest::Topic(_))),
    );
    let mut envelope = fixture("sns_batch");
    envelope["Records"]
        .as_array_mut()
        .unwrap()
        .truncate(1);

    let err = harness.dispatch(&envelope).await.unwrap_err();
    assert!(matches!(err, DispatchError::Rejected { index: 0, .. }));
    assert_eq!(err.kind(), "rejected");
}

#[tokio::test]
async fn schedules_are_delivered_by_name() {
    let harness = Harness::new(RecordingHandlers::new());
    let response = harness.dispatch(&fixture("schedule")).await.unwrap();
    assert_eq!(serde_json::to_value(&response).unwrap(), Value::Null);

    let deliveries = harness.handlers.deliveries().await;
    assert_eq!(
        deliveries[0].request,
        NormalizedRequest::Schedule(ScheduleTick {
            schedule_name: "nightly-report".into()
        })
    );
    assert_eq!(harness.inventory.calls(), 0);
}

#[tokio::test]
async fn health_probes_touch_neither_index_nor_handlers() {
    let harness = Harness::new(RecordingHandlers::new());
    let response = harness.dispatch(&fixture("healthcheck")).await.unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"healthy": true})
    );
    assert_eq!(harness.inventory.calls(), 0);
    assert!(harness.handlers.deliveries().await.is_empty());
}

#[tokio::test]
#[traced_test]
async fn unrecognized_envelopes_are_logged_and_rejected() {
    let harness = Harness::new(RecordingHandlers::new());
    let err = harness
        .dispatch(&json!({"detail-type": "mystery", "id": 7}))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "unsupported_event");
    assert!(logs_contain("unsupported event"));
    assert!(logs_contain("mystery"));
    assert_eq!(harness.inventory.calls(), 0);
}

#[tokio::test]
async fn websocket_lifecycle_events() {
    let harness = Harness::new(RecordingHandlers::new());
    for name in ["websocket_connect", "websocket_message", "websocket_disconnect"] {
        let response = harness.dispatch(&fixture(name)).await.unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"statusCode": 200}),
            "{name}"
        );
    }

    let deliveries = harness.handlers.deliveries().await;
    let kinds: Vec<_> = deliveries
        .iter()
        .map(|delivery| match &delivery.request {
            NormalizedRequest::Websocket(event) => {
                assert_eq!(event.socket_name, "chat");
                assert_eq!(event.connection_id, "L0SM9cOFvHcCIhw=");
                event.kind.clone()
            }
            other => panic!("expected websocket delivery, got {other:?}"),
        })
        .collect();

    match &kinds[0] {
        WebsocketEventKind::Connect { query_params } => {
            assert_eq!(query_params["token"], vec!["t-123"])
        }
        other => panic!("expected connect, got {other:?}"),
    }
    assert_eq!(
        kinds[1],
        WebsocketEventKind::Message {
            body: r#"{"action":"say","text":"hi"}"#.into()
        }
    );
    assert_eq!(kinds[2], WebsocketEventKind::Disconnect);
}

#[tokio::test]
async fn rejected_connections_answer_401() {
    let harness = Harness::new(RecordingHandlers::new().reject_connects());
    let response = harness.dispatch(&fixture("websocket_connect")).await.unwrap();
    assert_eq!(response, WireResponse::websocket(401));

    let response = harness.dispatch(&fixture("websocket_message")).await.unwrap();
    assert_eq!(response, WireResponse::websocket(200));
}

#[tokio::test]
async fn websocket_failures_carry_only_a_status() {
    let harness = Harness::new(RecordingHandlers::new().fail_when(|_| true));
    let response = harness.dispatch(&fixture("websocket_message")).await.unwrap();
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"statusCode": 500})
    );

    let mut unknown = fixture("websocket_connect");
    unknown["requestContext"]["apiId"] = json!("gone00");
    let response = harness.dispatch(&unknown).await.unwrap();
    assert_eq!(response, WireResponse::websocket(404));
}
