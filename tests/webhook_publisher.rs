use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};

use itemsvc::application::outbox::{MessagePublisher, PublishError};
use itemsvc::infra::messaging::WebhookPublisher;

#[derive(Clone, Default)]
struct Received {
    requests: Arc<Mutex<Vec<(Option<String>, Option<String>, String)>>>,
}

async fn accept(State(received): State<Received>, headers: HeaderMap, body: String) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    received.requests.lock().expect("requests lock").push((
        header("x-event-type"),
        header("content-type"),
        body,
    ));
    StatusCode::ACCEPTED
}

async fn reject() -> (StatusCode, &'static str) {
    (StatusCode::UNPROCESSABLE_ENTITY, "unknown event")
}

async fn reject_verbosely() -> (StatusCode, String) {
    (StatusCode::BAD_GATEWAY, "<html>".repeat(5_000))
}

async fn spawn_receiver() -> (SocketAddr, Received) {
    let received = Received::default();
    let app = Router::new()
        .route("/events", post(accept))
        .route("/reject", post(reject))
        .route("/reject-verbose", post(reject_verbosely))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind receiver");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("receiver serve");
    });
    (addr, received)
}

#[tokio::test]
async fn posts_payload_with_event_type_header() {
    let (addr, received) = spawn_receiver().await;
    let publisher = WebhookPublisher::new(&format!("http://{addr}/events"), Duration::from_secs(5))
        .expect("publisher");

    let payload = r#"{"itemId":7,"createdAt":"2026-01-01T00:00:00Z"}"#;
    publisher
        .publish("ItemCreatedV1", payload)
        .await
        .expect("publish accepted");

    let requests = received.requests.lock().expect("requests lock").clone();
    assert_eq!(requests.len(), 1);
    let (event_type, content_type, body) = &requests[0];
    assert_eq!(event_type.as_deref(), Some("ItemCreatedV1"));
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, payload);
}

#[tokio::test]
async fn non_success_status_is_a_rejection() {
    let (addr, _) = spawn_receiver().await;
    let publisher = WebhookPublisher::new(&format!("http://{addr}/reject"), Duration::from_secs(5))
        .expect("publisher");

    let err = publisher
        .publish("ItemDeletedV1", "{}")
        .await
        .expect_err("rejected");

    match err {
        PublishError::Rejected { event_type, reason } => {
            assert_eq!(event_type, "ItemDeletedV1");
            assert!(reason.contains("422"));
            assert!(reason.contains("unknown event"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let publisher = WebhookPublisher::new(&format!("http://{addr}/events"), Duration::from_secs(2))
        .expect("publisher");

    let err = publisher
        .publish("ItemCreatedV1", "{}")
        .await
        .expect_err("connection refused");
    assert!(matches!(err, PublishError::Unavailable(_)));
}

#[tokio::test]
async fn verbose_rejection_body_is_shortened() {
    let (addr, _) = spawn_receiver().await;
    let publisher = WebhookPublisher::new(
        &format!("http://{addr}/reject-verbose"),
        Duration::from_secs(5),
    )
    .expect("publisher");

    let err = publisher
        .publish("ItemCreatedV1", "{}")
        .await
        .expect_err("rejected");

    let PublishError::Rejected { reason, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert!(reason.contains("502"));
    assert!(reason.ends_with("..."));
    assert!(reason.len() < 600, "reason kept {} bytes", reason.len());
}
