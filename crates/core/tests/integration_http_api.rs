//! Integration tests for the HTTP control API
//!
//! Requests go through the full router with a scripted runner underneath.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::*;
use std::sync::Arc;
use tailgate_core::http::router;
use tailgate_core::process::mock::{MockResponse, MockRunner};
use tempfile::TempDir;
use tower::ServiceExt;

fn app(runner: &MockRunner, dir: &TempDir) -> Router {
    router(Arc::new(service(runner, dir.path())))
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post(app: Router, uri: &str) -> Response {
    app.oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_status_of_authenticated_node() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/container/status").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["authenticated"], true);
    assert_eq!(json["hostname"], HOSTNAME);
    assert_eq!(json["ip_address"], "100.64.10.20");
}

#[tokio::test]
async fn test_start_reports_creation() {
    let runner = MockRunner::new();
    runner.on("docker inspect", no_such_container());
    runner.on("docker run", MockResponse::ok("abc123\n"));
    let dir = TempDir::new().unwrap();

    let response = post(app(&runner, &dir), "/api/tailscale/container/start").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "created");
}

#[tokio::test]
async fn test_auth_url_returns_url_and_qr_code() {
    let runner = MockRunner::new();
    running_unauthenticated(&runner);
    runner.on("tailscale up", login_output("0123abcd"));
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/container/auth-url").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["auth_url"], "https://login.tailscale.com/a/0123abcd");
    assert!(json["qr_code_data"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert_eq!(json["web_url"], "https://login.tailscale.com/admin/machines");
}

#[tokio::test]
async fn test_auth_url_for_authenticated_node_is_conflict() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/container/auth-url").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "already_authenticated");
}

#[tokio::test]
async fn test_stopped_container_is_conflict_for_logout() {
    let runner = MockRunner::new();
    runner.on("docker inspect", MockResponse::ok(EXITED_STATE));
    let dir = TempDir::new().unwrap();

    let response = post(app(&runner, &dir), "/api/tailscale/container/logout").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "not_running");
}

#[tokio::test]
async fn test_provision_cert_timeout_is_gateway_timeout_with_record() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    runner.on("tailscale cert", MockResponse::hang());
    let dir = TempDir::new().unwrap();

    let response = post(
        app(&runner, &dir),
        "/api/tailscale/container/provision-cert?timeout_secs=3",
    )
    .await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = body_json(response).await;
    assert_eq!(json["provisioned"], false);
    assert_eq!(json["timed_out"], true);
    assert!(json["error"].as_str().unwrap().contains("timed out after 3s"));
}

#[tokio::test]
async fn test_provision_cert_failure_is_ok_with_diagnosis() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    runner.on(
        "tailscale cert",
        MockResponse::fail(1, "read tcp: connection reset by peer"),
    );
    let dir = TempDir::new().unwrap();

    let response = post(app(&runner, &dir), "/api/tailscale/container/provision-cert").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["provisioned"], false);
    assert_eq!(json["diagnosis"]["issues"][0]["kind"], "connection_reset");
    assert_eq!(json["diagnosis"]["transient"], true);
}

#[tokio::test]
async fn test_configure_serve_accepts_topology_json() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    let dir = TempDir::new().unwrap();
    let body = serde_json::json!({
        "deployment_mode": "multi",
        "hostname": HOSTNAME,
        "backend_port": 8080,
        "use_caddy_proxy": false
    });

    let response = app(&runner, &dir)
        .oneshot(
            Request::post("/api/tailscale/configure-serve")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["deployment_mode"], "multi");
    let api = json["routes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["path"] == "/api")
        .unwrap()
        .clone();
    assert_eq!(api["target"], "http://tailgate-dev-backend:8080");
}

#[tokio::test]
async fn test_configure_serve_rejects_foreign_hostname() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    let dir = TempDir::new().unwrap();
    let body = serde_json::json!({"hostname": "app.example.com"});

    let response = app(&runner, &dir)
        .oneshot(
            Request::post("/api/tailscale/configure-serve")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_topology_is_a_json_bad_request() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    let dir = TempDir::new().unwrap();

    for (content_type, body) in [
        ("application/json", r#"{"deployment_mode": "multi"}"#),
        ("application/json", "{not json"),
        ("text/plain", r#"{"hostname": "dev.example.ts.net"}"#),
    ] {
        let response = app(&runner, &dir)
            .oneshot(
                Request::post("/api/tailscale/configure-serve")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert!(!json["message"].as_str().unwrap().is_empty());
    }
    assert_eq!(runner.count("serve set-raw"), 0);
}

#[tokio::test]
async fn test_malformed_query_is_a_json_bad_request() {
    let runner = MockRunner::new();
    running_unauthenticated(&runner);
    let dir = TempDir::new().unwrap();

    let response = get(
        app(&runner, &dir),
        "/api/tailscale/container/auth-url?regenerate=maybe",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("Failed to deserialize query string"));

    let response = post(
        app(&runner, &dir),
        "/api/tailscale/container/provision-cert?retries=many",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
    assert_eq!(runner.count("tailscale up"), 0);
    assert_eq!(runner.count("tailscale cert"), 0);
}

#[tokio::test]
async fn test_control_plane_outage_is_service_unavailable() {
    let runner = MockRunner::new();
    running_unauthenticated(&runner);
    runner.on(
        "tailscale up",
        MockResponse::fail(1, "backend error: dial tcp: i/o timeout"),
    );
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/container/auth-url").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "control_plane");
}

#[tokio::test]
async fn test_access_urls_and_tailnet_settings() {
    let runner = MockRunner::new();
    running_authenticated(&runner);
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/access-urls").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["frontend"], format!("https://{}", HOSTNAME));
    assert_eq!(json["backend"], format!("https://{}/api", HOSTNAME));
    assert_eq!(json["environments"]["dev"], format!("https://{}", HOSTNAME));

    let response = get(app(&runner, &dir), "/api/tailscale/container/tailnet-settings").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["magic_dns"]["enabled"], true);
    assert_eq!(json["https_serve"]["enabled"], true);
    assert_eq!(json["tailnet"], "example.github");
    assert_eq!(json["magic_dns_suffix"], "example.ts.net");
}

#[tokio::test]
async fn test_serve_status_without_a_container_is_ok() {
    let runner = MockRunner::new();
    runner.on("docker inspect", no_such_container());
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/serve-status").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "container_absent");

    let runner = MockRunner::new();
    runner.on("docker inspect", MockResponse::ok(EXITED_STATE));
    let response = get(app(&runner, &dir), "/api/tailscale/serve-status").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "container_stopped");
    assert_eq!(runner.count("serve status"), 0);
}

#[tokio::test]
async fn test_serve_status_before_login_is_ok() {
    let runner = MockRunner::new();
    running_unauthenticated(&runner);
    runner.on("tailscale serve status", MockResponse::ok("{}"));
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/serve-status").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "not_configured");
}

#[tokio::test]
async fn test_tailnet_settings_without_a_container_reads_disabled() {
    let runner = MockRunner::new();
    runner.on("docker inspect", no_such_container());
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/container/tailnet-settings").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["magic_dns"]["enabled"], false);
    assert_eq!(json["https_serve"]["enabled"], false);
    assert!(json.get("tailnet").is_none());
    assert_eq!(runner.count("tailscale status"), 0);
}

#[tokio::test]
async fn test_access_urls_before_login_is_conflict() {
    let runner = MockRunner::new();
    running_unauthenticated(&runner);
    let dir = TempDir::new().unwrap();

    let response = get(app(&runner, &dir), "/api/tailscale/access-urls").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "not_authenticated");
}

#[tokio::test]
async fn test_remove_with_volume() {
    let runner = MockRunner::new();
    let dir = TempDir::new().unwrap();

    let response = post(
        app(&runner, &dir),
        "/api/tailscale/container/remove?remove_volume=true",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["container_removed"], true);
    assert_eq!(json["volume_removed"], true);
    assert!(json.get("device_cleanup").is_none());
}
