//! HTTP-level tests: routing, token auth and status-code mapping.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use markdown_gateway::config::GatewayConfigBuilder;
use markdown_gateway::{server, Gateway, GatewayConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "svc-token-123";

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config(server: &MockServer, dir: &TempDir) -> GatewayConfigBuilder {
    GatewayConfig::builder()
        .api_url(format!("{}/marker", server.uri()))
        .api_key("test-key")
        .temp_dir(dir.path())
        .service_token(TOKEN)
        .poll_interval_ms(10)
        .retry_delay_ms(10)
}

async fn app(builder: GatewayConfigBuilder) -> Router {
    let gateway = Gateway::new(builder.build().unwrap()).await.unwrap();
    server::router(Arc::new(gateway))
}

async fn mount_markdown(server: &MockServer, markdown: &str) {
    Mock::given(method("POST"))
        .and(path("/marker"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"markdown": markdown})))
        .mount(server)
        .await;
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(t) = token {
        builder = builder.header(server::SERVICE_TOKEN_HEADER, t);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(server::SERVICE_TOKEN_HEADER, TOKEN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_multipart(filename: &str, bytes: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    let boundary = "gateway-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/v1/convert")
        .header(server::SERVICE_TOKEN_HEADER, TOKEN)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_open() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (status, body) = send(app(config(&server, &dir)).await, get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["temp_directory"], true);
    assert_eq!(body["checks"]["marker_api_configured"], true);
    assert_eq!(body["service"], "markdown-service");
}

#[tokio::test]
async fn protected_routes_require_token() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app(config(&server, &dir)).await;

    let (status, body) = send(app.clone(), get("/system/info", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");

    let (status, _) = send(app.clone(), get("/system/info", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(app, get("/system/info", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_system"]["output_file_count"], 0);
}

#[tokio::test]
async fn dev_mode_skips_token_check() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app(config(&server, &dir).dev_mode(true)).await;

    let (status, _) = send(app, get("/system/info", None)).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Conversion endpoints ─────────────────────────────────────────────────────

#[tokio::test]
async fn json_conversion_succeeds() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_markdown(&server, "# Hello").await;
    let app = app(config(&server, &dir)).await;

    let req = json!({
        "file_content": STANDARD.encode(b"%PDF-1.4 hello"),
        "filename": "hello.pdf",
        "request_id": "req-0001-abcd",
    });
    let (status, body) = send(app, post_json("/v1/convert-json", &req)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["markdown_content"], "# Hello");
    assert_eq!(body["request_id"], "req-0001-abcd");
    assert_eq!(body["output_method"], "inline");
    assert!(body.get("markdown_url").is_none());
}

#[tokio::test]
async fn validation_failure_is_422_with_response_body() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app(config(&server, &dir)).await;

    let req = json!({"filename": "hello.pdf"});
    let (status, body) = send(app.clone(), post_json("/v1/convert-json", &req)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "INVALID_REQUEST");

    let req = json!({"filename": "a.pdf", "file_content": "YQ==", "output_method": "stream"});
    let (status, body) = send(app, post_json("/v1/convert-json", &req)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn pipeline_failure_is_200_with_success_false() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path("/marker"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let app = app(config(&server, &dir)).await;

    let req = json!({"filename": "a.pdf", "file_content": STANDARD.encode(b"%PDF-1.4 x")});
    let (status, body) = send(app, post_json("/v1/convert-json", &req)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "UPSTREAM_STATUS");
    assert_eq!(body["output_method"], "inline");
}

#[tokio::test]
async fn multipart_upload_with_reference_output() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_markdown(&server, "# Uploaded").await;
    let app = app(config(&server, &dir)).await;

    let (status, body) = send(
        app.clone(),
        post_multipart("scan.pdf", b"%PDF-1.4 upload", &[("output_method", "reference")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true, "body: {body}");
    assert_eq!(body["output_method"], "reference");
    assert_eq!(body["file_info"]["source"], "upload");

    let locator = body["markdown_url"].as_str().unwrap().to_string();
    let (status, body) = send(app, get(&locator, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "# Uploaded");
    assert_eq!(body["filename"], locator.trim_start_matches("/outputs/"));
}

#[tokio::test]
async fn multipart_without_file_is_422() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app(config(&server, &dir)).await;

    let boundary = "b";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"request_id\"\r\n\r\nreq-12345678\r\n--{boundary}--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/v1/convert")
        .header(server::SERVICE_TOKEN_HEADER, TOKEN)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}

// ── Outputs ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn output_lookup_maps_to_404_and_403() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = app(config(&server, &dir)).await;

    let (status, body) = send(app.clone(), get("/outputs/missing_00000000.md", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    let (status, _) = send(app, get("/outputs/..%2F..%2Fetc%2Fpasswd", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
