// HTTP surface tests driven through the router
// Author: kelexine (https://github.com/kelexine)

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use genvault::audit::{verify_segment, AuditLog, AuditSegment};
use genvault::cache::MultiTierCache;
use genvault::config::AppConfig;
use genvault::error::GenerationFailure;
use genvault::integrity::Sealer;
use genvault::orchestrator::Orchestrator;
use genvault::pipeline::{GenerationPipeline, PipelineInput};
use genvault::ratelimit::RateLimiter;
use genvault::server::{create_router, OWNER_HEADER};
use genvault::templates::{InMemorySource, TemplateCache};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Uppercase;

#[async_trait]
impl GenerationPipeline for Uppercase {
    async fn generate(&self, input: PipelineInput) -> Result<Bytes, GenerationFailure> {
        Ok(Bytes::from(input.prompt.to_uppercase()))
    }
}

async fn app(configure: impl FnOnce(&mut AppConfig)) -> (Router, Arc<AuditLog>) {
    let mut config = AppConfig::default();
    config.security.hmac_secret = "00112233445566778899aabbccddeeff".to_string();
    config.security.master_secret = "ffeeddccbbaa99887766554433221100".to_string();
    config.security.kdf_iterations = 1_000;
    config.cache.persistent.enabled = false;
    configure(&mut config);

    let sealer = Arc::new(Sealer::from_config(&config.security).unwrap());
    let audit = Arc::new(AuditLog::new(sealer.signer().clone(), config.audit.clone()));
    let cache = Arc::new(
        MultiTierCache::new(&config.cache, sealer, Arc::clone(&audit))
            .await
            .unwrap(),
    );
    let templates = Arc::new(TemplateCache::new(
        &config.templates,
        Arc::new(InMemorySource::new().with("greet", "hello {{ name }}")),
    ));
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        cache,
        RateLimiter::new(&config.rate_limit),
        templates,
        Arc::new(Uppercase),
        Arc::clone(&audit),
    );

    (create_router(config, orchestrator, Arc::clone(&audit)), audit)
}

fn post(uri: &str, owner: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(owner) = owner {
        builder = builder.header(OWNER_HEADER, owner);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_components() {
    let (app, _) = app(|_| {}).await;
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["checks"]["cache"].is_object());
    assert!(body["checks"]["audit"].is_object());
    assert!(body["checks"]["admission"].is_object());
}

#[tokio::test]
async fn test_generate_then_cached() {
    let (app, _) = app(|_| {}).await;
    let request = json!({ "template_id": "greet", "params": { "name": "ada" } });

    let first = app
        .clone()
        .oneshot(post("/v1/generate", Some("alice"), request.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;
    assert_eq!(first["status"], "success");
    assert_eq!(first["content"], "HELLO ADA");
    assert_eq!(first["cached"], false);

    let second = app
        .oneshot(post("/v1/generate", Some("alice"), request))
        .await
        .unwrap();
    let second = json_body(second).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["tier"], "fast");
}

#[tokio::test]
async fn test_missing_owner_is_rejected() {
    let (app, _) = app(|_| {}).await;
    let response = app
        .oneshot(post(
            "/v1/generate",
            None,
            json!({ "template_id": "greet", "params": { "name": "ada" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_unknown_template_is_422() {
    let (app, _) = app(|_| {}).await;
    let response = app
        .oneshot(post("/v1/generate", Some("alice"), json!({ "template_id": "nope" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_exhausted_bucket_is_429() {
    let (app, _) = app(|config| {
        config.rate_limit.capacity = 1;
        config.rate_limit.refill_per_second = 0.001;
        config.orchestrator.max_admission_wait_ms = 0;
    })
    .await;

    let first = app
        .clone()
        .oneshot(post(
            "/v1/generate",
            Some("alice"),
            json!({ "template_id": "greet", "params": { "name": "a" } }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(post(
            "/v1/generate",
            Some("alice"),
            json!({ "template_id": "greet", "params": { "name": "b" } }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after-ms"));
}

#[tokio::test]
async fn test_batch_keeps_input_order() {
    let (app, _) = app(|_| {}).await;
    let job = json!({
        "items": [
            { "template_id": "greet", "params": { "name": "one" } },
            { "template_id": "missing" },
            { "template_id": "greet", "params": { "name": "three" } }
        ],
        "concurrency_limit": 2
    });

    let response = app
        .oneshot(post("/v1/batch", Some("alice"), job))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["content"], "HELLO ONE");
    assert_eq!(results[1]["status"], "failure");
    assert_eq!(results[1]["error"]["kind"], "template");
    assert_eq!(results[2]["content"], "HELLO THREE");
    assert_eq!(body["summary"]["succeeded"], 2);
    assert_eq!(body["summary"]["failed"], 1);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let (app, _) = app(|_| {}).await;
    let response = app
        .oneshot(post("/v1/batch", Some("alice"), json!({ "items": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_export_verifies() {
    let (app, audit) = app(|_| {}).await;
    app.clone()
        .oneshot(post(
            "/v1/generate",
            Some("alice"),
            json!({ "template_id": "greet", "params": { "name": "ada" } }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::get("/v1/audit/export").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let segments: Vec<AuditSegment> = serde_json::from_slice(&bytes).unwrap();
    assert!(!segments.is_empty());
    for segment in &segments {
        assert!(verify_segment(segment, audit.signer()).is_ok());
    }
}

#[tokio::test]
async fn test_metrics_endpoint_is_text() {
    let (app, _) = app(|_| {}).await;
    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}
