//! End-to-end tests: GraphQL requests through the router, counting how many
//! bulk reads reach the entity store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use fanin_api::store::{demo_service_id, EntityKind};
use fanin_api::telemetry::TelemetryConfig;
use fanin_api::{create_router, ApiConfig, InMemoryStore, SharedStore};
use fanin_core::LoaderConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

const NESTED_QUERY: &str = r#"{
    alerts(ids: [1, 2, 3, 4, 5, 6, 7, 8]) {
        id
        summary
        service { name escalationPolicy { name owner { email } } }
        state { status }
        logs { event }
    }
}"#;

fn telemetry() -> TelemetryConfig {
    TelemetryConfig {
        service_name: "fanin-api-test".to_string(),
        log_json: false,
        metrics_enabled: true,
    }
}

fn app(loaders_enabled: bool) -> (Arc<InMemoryStore>, Router) {
    let store = Arc::new(InMemoryStore::demo());
    let shared: SharedStore = store.clone();
    let config = ApiConfig::default()
        .with_loaders_enabled(loaders_enabled)
        .with_loader(LoaderConfig::new().with_delay(Duration::from_millis(10)));
    (store, create_router(shared, config, &telemetry()))
}

async fn post_graphql(app: &Router, query: &str) -> Value {
    let body = json!({ "query": query }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn assert_no_errors(body: &Value) {
    assert!(body.get("errors").is_none(), "unexpected errors: {}", body["errors"]);
}

#[tokio::test]
async fn test_nested_query_one_read_per_kind() {
    let (store, app) = app(true);

    let body = post_graphql(&app, NESTED_QUERY).await;
    assert_no_errors(&body);

    let alerts = body["data"]["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 8);
    assert_eq!(alerts[0]["service"]["escalationPolicy"]["owner"]["email"], "user-2@example.com");
    assert_eq!(alerts[3]["logs"].as_array().unwrap().len(), 0);
    assert_eq!(alerts[4]["logs"].as_array().unwrap().len(), 2);

    for kind in [
        EntityKind::Alert,
        EntityKind::AlertState,
        EntityKind::Service,
        EntityKind::EscalationPolicy,
        EntityKind::User,
        EntityKind::AlertLog,
    ] {
        assert_eq!(store.calls(kind), 1, "{kind:?} reads");
    }
}

#[tokio::test]
async fn test_same_answer_without_loaders() {
    let (batched_store, batched) = app(true);
    let (direct_store, direct) = app(false);

    let with_loaders = post_graphql(&batched, NESTED_QUERY).await;
    let without_loaders = post_graphql(&direct, NESTED_QUERY).await;
    assert_no_errors(&without_loaders);

    assert_eq!(with_loaders["data"], without_loaders["data"]);
    assert_eq!(direct_store.calls(EntityKind::Alert), 8);
    assert!(direct_store.total_calls() > batched_store.total_calls());
}

#[tokio::test]
async fn test_loaders_do_not_outlive_request() {
    let (store, app) = app(true);

    post_graphql(&app, "{ alert(id: 1) { id } }").await;
    post_graphql(&app, "{ alert(id: 1) { id } }").await;

    // Each request has its own cache.
    assert_eq!(store.calls(EntityKind::Alert), 2);
}

#[tokio::test]
async fn test_store_failure_surfaces_as_error_code() {
    let (store, app) = app(true);
    store.fail_with("primary unreachable");

    let body = post_graphql(&app, "{ alerts(ids: [1, 2]) { id } }").await;
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["extensions"]["code"], "DATABASE_ERROR");
    assert!(!errors[0]["message"].as_str().unwrap().contains("primary unreachable"));
    assert_eq!(store.calls(EntityKind::Alert), 1);
}

#[tokio::test]
async fn test_services_for_tenant() {
    let (store, app) = app(true);
    let ids = [1, 2, 3].map(|n| demo_service_id(n).to_string());
    let query = format!(
        r#"{{ servicesForTenant(tenant: "acme", ids: ["{}", "{}", "{}"]) {{ name tenant }} }}"#,
        ids[0], ids[1], ids[2]
    );

    let body = post_graphql(&app, &query).await;
    assert_no_errors(&body);

    let services = body["data"]["servicesForTenant"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert!(services.iter().all(|s| s["tenant"] == "acme"));
    assert_eq!(store.calls(EntityKind::Service), 1);
}

#[tokio::test]
async fn test_request_timeout_reported() {
    let store = Arc::new(InMemoryStore::demo().with_latency(Duration::from_millis(200)));
    let shared: SharedStore = store.clone();
    let config = ApiConfig::default().with_request_timeout(Duration::from_millis(20));
    let app = create_router(shared, config, &telemetry());

    let body = post_graphql(&app, "{ alert(id: 1) { id } }").await;
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors[0]["extensions"]["code"], "TIMEOUT");
}

#[tokio::test]
async fn test_metrics_export_loader_counters() {
    let (_, app) = app(true);
    post_graphql(&app, NESTED_QUERY).await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("fanin_loader_batches_total"));
    assert!(text.contains("loader=\"alert_logs\""));
}

#[tokio::test]
async fn test_health_ready() {
    let (_, app) = app(true);

    let request = Request::builder().uri("/health/ready").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_ready_reports_store_failure() {
    let (store, app) = app(true);
    store.fail_with("primary unreachable");

    let request = Request::builder().uri("/health/ready").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["store"]["status"], "unhealthy");
}
