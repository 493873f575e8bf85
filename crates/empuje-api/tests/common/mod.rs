//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use empuje_core::bus::MessageBus;
use empuje_core::clock::Clock;
use empuje_core::registry::{OrganizationId, OrganizationRegistry};
use empuje_messaging::application::dispatcher::DispatcherSettings;
use empuje_messaging::domain::ports::{FederationStore, HostedEventDirectory};
use empuje_store::{PgFederationStore, PgHostedEventDirectory};
use empuje_test_support::{FixedClock, RecordingBus, fixed_now};
use http_body_util::BodyExt;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use empuje_api::app;
use empuje_api::bootstrap::{Node, NodeParts};
use empuje_api::workers::{self, ConsumerGroup};

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(fixed_now()))
}

/// Retry bounds short enough for tests.
fn fast_settings() -> DispatcherSettings {
    DispatcherSettings {
        processing_timeout: Duration::from_secs(5),
        max_attempts: 5,
        backoff_base: Duration::from_millis(20),
        backoff_cap: Duration::from_millis(200),
    }
}

/// Wire a node for `organization` over the given parts.
pub fn build_node(
    organization: &str,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn FederationStore>,
    directory: Arc<dyn HostedEventDirectory>,
) -> Node {
    Node::assemble(NodeParts {
        registry: OrganizationRegistry::new(OrganizationId::new(organization)),
        bus,
        store,
        directory,
        clock: fixed_clock(),
        retention: chrono::Duration::hours(168),
        dispatcher: fast_settings(),
    })
}

/// Build the full app router for `org-A` over Postgres, publishing into a
/// recording bus.
pub fn build_test_app(pool: PgPool) -> Router {
    let node = build_node(
        "org-A",
        Arc::new(RecordingBus::new()),
        Arc::new(PgFederationStore::new(pool.clone())),
        Arc::new(PgHostedEventDirectory::new(pool)),
    );
    app(node.state)
}

/// Start two consumer workers for `node` on `bus`.
pub async fn start_consumers(
    bus: &Arc<dyn MessageBus>,
    node: &Node,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let group = ConsumerGroup {
        group_id: "empuje-messaging-group".to_string(),
        workers: 2,
        member_offset: 0,
        members: 2,
    };
    workers::spawn_consumers(
        bus,
        &node.dispatcher,
        node.state.registry.own_organization_id(),
        &group,
        shutdown,
    )
    .await
    .unwrap()
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Poll `uri` until it answers 200 with a body satisfying `done`.
pub async fn get_json_until(
    app: &Router,
    uri: &str,
    done: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..200 {
        let (status, json) = get_json(app.clone(), uri).await;
        if status == StatusCode::OK && done(&json) {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("GET {uri} did not reach the expected state");
}
