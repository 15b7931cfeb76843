// HTTP-level tests that run without a database
mod common;

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use common::create_test_app;
use serde_json::json;

const KEY: &str = "test-key";

fn api_key(value: &'static str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static("x-api-key"), HeaderValue::from_static(value))
}

#[tokio::test]
async fn test_health_reports_degraded_database() {
    let server = TestServer::new(create_test_app(Some(KEY))).unwrap();

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["service"], "nimbus-api");
    assert_eq!(body["checks"]["database"], "unreachable");
}

#[tokio::test]
async fn test_protected_route_requires_key() {
    let server = TestServer::new(create_test_app(Some(KEY))).unwrap();

    let response = server.get("/providers/types").await;

    assert_eq!(response.status_code(), 401);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "api_key_required");
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let server = TestServer::new(create_test_app(Some(KEY))).unwrap();
    let (name, value) = api_key("nope");

    let response = server.get("/providers/types").add_header(name, value).await;

    assert_eq!(response.status_code(), 401);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "invalid_api_key");
}

#[tokio::test]
async fn test_valid_key_lists_provider_types() {
    let server = TestServer::new(create_test_app(Some(KEY))).unwrap();
    let (name, value) = api_key(KEY);

    let response = server.get("/providers/types").add_header(name, value).await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["supported_types"], json!(["oci"]));
}

#[tokio::test]
async fn test_routes_are_open_without_configured_key() {
    let server = TestServer::new(create_test_app(None)).unwrap();

    let response = server.get("/providers/types").await;

    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_unsupported_provider_type_is_rejected() {
    let server = TestServer::new(create_test_app(None)).unwrap();

    let response = server
        .post("/providers")
        .json(&json!({
            "id": "aws-main",
            "provider_type": "aws",
            "display_name": "AWS"
        }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_invalid_budget_action_is_rejected() {
    let server = TestServer::new(create_test_app(None)).unwrap();

    let response = server
        .post("/budget/rules")
        .json(&json!({
            "monthly_limit": 100.0,
            "action_on_exceed": "delete_everything"
        }))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_invalid_spending_period_is_rejected() {
    let server = TestServer::new(create_test_app(None)).unwrap();

    let response = server
        .post("/budget/spending")
        .json(&json!({
            "provider_id": "oci-main",
            "amount": 10.0,
            "period": "2026-13"
        }))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_unknown_resource_action_is_rejected() {
    let server = TestServer::new(create_test_app(None)).unwrap();

    let response = server
        .post("/resources/6f1c1f3e-5d0a-4a54-9d43-3c1a1c0de001/action")
        .json(&json!({ "action": "reboot" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert!(body["message"].as_str().unwrap().contains("reboot"));
}

#[tokio::test]
async fn test_audit_limit_is_bounded() {
    let server = TestServer::new(create_test_app(None)).unwrap();

    let response = server.get("/audit?limit=501").await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let server = TestServer::new(create_test_app(Some(KEY))).unwrap();

    let response = server.get("/api-docs/openapi.json").await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert!(body["paths"]["/resources/{id}/action"].is_object());
    assert!(body["paths"]["/budget/enforce"].is_object());
}

#[test]
fn test_database_errors_surface_as_500() {
    // the pool is lazy, so the failure shows up on the first query
    tokio_test::block_on(async {
        let pool = common::unreachable_pool();
        let err = nimbus_api::handlers::providers::find_provider(&pool, "oci-main")
            .await
            .unwrap_err();
        let api: nimbus_api::ApiError = err.into();
        assert_eq!(api.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    });
}

#[tokio::test]
async fn test_scheduler_tick_survives_database_outage() {
    use nimbus_api::app::AppState;
    use nimbus_api::provider_registry::ProviderRegistry;
    use nimbus_api::scheduler;
    use std::sync::Arc;

    let state = AppState::new(
        common::unreachable_pool(),
        ProviderRegistry::new(Arc::new(common::MockConnector)),
        None,
    );

    let report = scheduler::tick(&state).await;

    assert!(report.synced.is_empty());
    assert!(report.budget.is_none());
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].starts_with("listing providers"));
    assert!(report.errors[1].starts_with("budget enforcement"));
    assert!(!report.is_clean());
}
