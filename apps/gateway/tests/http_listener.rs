use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use membrane_core::testkit::{RecordingHandlers, load_fixture};
use membrane_core::{HttpResponse, NormalizedRequest};
use membrane_gateway::lifecycle::http::build_router;
use membrane_gateway::{Dispatcher, Gateway, HttpGateway, LifecycleState};
use membrane_resources::{DiscoveryTag, InMemoryInventory, ResourceIndex, TaggedResource};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn dispatcher(handlers: &Arc<RecordingHandlers>) -> Arc<Dispatcher> {
    let inventory = Arc::new(InMemoryInventory::new(vec![vec![TaggedResource::new(
        "arn:aws:apigateway:us-east-1::/apis/a1b2c3",
        [("x-membrane-name", "items-api")],
    )]]));
    let index = Arc::new(ResourceIndex::new(inventory, DiscoveryTag::default()));
    Arc::new(Dispatcher::new(index, handlers.into_handlers()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn invoke_endpoint_returns_the_wire_response() {
    let handlers = Arc::new(RecordingHandlers::new());
    let app = build_router(dispatcher(&handlers));
    let envelope = load_fixture("apps/gateway/tests/fixtures/http_api.json");

    let response = app
        .oneshot(
            Request::post("/__membrane/invoke")
                .body(Body::from(serde_json::to_vec(&envelope).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let wire = body_json(response).await;
    assert_eq!(wire["statusCode"], 200);
    assert_eq!(wire["isBase64Encoded"], true);
    assert_eq!(handlers.deliveries().await[0].api.as_deref(), Some("items-api"));
}

#[tokio::test]
async fn invoke_failures_report_only_the_error_kind() {
    let handlers = Arc::new(RecordingHandlers::new());
    let app = build_router(dispatcher(&handlers));

    let response = app
        .oneshot(
            Request::post("/__membrane/invoke")
                .body(Body::from(r#"{"unexpected": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"errorType": "unsupported_event", "errorMessage": "event dispatch failed"})
    );
}

#[tokio::test]
async fn incoming_request_ids_are_reused() {
    let handlers = Arc::new(RecordingHandlers::new());
    let app = build_router(dispatcher(&handlers));

    let response = app
        .oneshot(
            Request::get("/__membrane/health")
                .header("x-request-id", "rid-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "rid-42");
    assert_eq!(body_json(response).await, json!({"healthy": true}));
}

#[tokio::test]
async fn other_paths_are_proxied_with_raw_bodies() {
    let reply = HttpResponse::new(201, "created")
        .with_header("x-item", "1")
        .with_header("x-item", "2");
    let handlers = Arc::new(RecordingHandlers::new().with_http_response(reply));
    let app = build_router(dispatcher(&handlers));

    let response = app
        .oneshot(
            Request::put("/items/9?dry=1")
                .header("host", "api.example.test")
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let items: Vec<_> = response
        .headers()
        .get_all("x-item")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(items, vec!["1", "2"]);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"created");

    let deliveries = handlers.deliveries().await;
    assert_eq!(deliveries[0].api, None);
    let NormalizedRequest::Http(request) = &deliveries[0].request else {
        panic!("expected http delivery");
    };
    assert_eq!(request.method, "PUT");
    assert_eq!(request.path, "/items/9");
    assert_eq!(request.query_params["dry"], vec!["1"]);
    assert_eq!(request.headers["X-Forwarded-For"], vec!["api.example.test"]);
    assert_eq!(request.body.as_ref(), b"payload");
}

#[tokio::test]
async fn listener_serves_until_stopped() {
    let handlers = Arc::new(RecordingHandlers::new());
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let gateway = Arc::new(HttpGateway::bind(addr, dispatcher(&handlers)).await.unwrap());
    let base = format!("http://{}", gateway.local_addr());

    let runner = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.start().await }
    });

    let client = reqwest::Client::new();
    let mut health = None;
    for _ in 0..50 {
        match client.get(format!("{base}/__membrane/health")).send().await {
            Ok(response) => {
                health = Some(response);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let health = health.expect("listener answered");
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(gateway.state(), LifecycleState::Running);

    let echoed = client
        .post(format!("{base}/echo"))
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(echoed.text().await.unwrap(), "ping");
    drop(health);
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), gateway.stop())
        .await
        .expect("listener drains");
    assert_eq!(gateway.state(), LifecycleState::Stopped);
    runner.await.unwrap().unwrap();
}
