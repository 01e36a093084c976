// Error handling tests
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::IntoResponse;
use genvault::error::{GenerationFailure, VaultError};
use genvault::orchestrator::ItemFailure;
use http_body_util::BodyExt;

async fn body_json(error: VaultError) -> (StatusCode, Option<String>, serde_json::Value) {
    let response = error.into_response();
    let status = response.status();
    let retry = response
        .headers()
        .get("retry-after-ms")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, retry, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_error_display_messages() {
    let errors = vec![
        VaultError::Config("missing secret".to_string()),
        VaultError::IntegrityFailure("tag mismatch".to_string()),
        VaultError::QuotaExceeded { retry_after_ms: 250 },
        VaultError::CapacityRejected("disk full".to_string()),
        VaultError::Generation(GenerationFailure::Timeout(100)),
        VaultError::Cancelled,
        VaultError::Template("not found".to_string()),
        VaultError::InvalidRequest("bad".to_string()),
        VaultError::Internal("boom".to_string()),
    ];

    for error in errors {
        let display = format!("{}", error);
        assert!(!display.is_empty(), "Error should have display message");
    }
}

#[tokio::test]
async fn test_quota_exceeded_is_429_with_retry_hint() {
    let (status, retry, body) = body_json(VaultError::QuotaExceeded { retry_after_ms: 1500 }).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(retry.as_deref(), Some("1500"));
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
}

#[tokio::test]
async fn test_generation_failures_map_to_gateway_statuses() {
    let (status, retry, body) = body_json(GenerationFailure::Timeout(50).into()).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(retry.is_none());
    assert_eq!(body["error"]["type"], "generation_timeout");

    let (status, _, _) = body_json(GenerationFailure::Provider("503".to_string()).into()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, _, _) = body_json(GenerationFailure::Validation("too long".to_string()).into()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_invalid_request_is_400() {
    let (status, _, body) = body_json(VaultError::InvalidRequest("Missing template_id".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Missing template_id"));
}

#[test]
fn test_retryable_errors() {
    assert!(VaultError::QuotaExceeded { retry_after_ms: 1 }.is_retryable());
    assert!(VaultError::Generation(GenerationFailure::Provider("x".to_string())).is_retryable());
    assert!(!VaultError::Generation(GenerationFailure::Validation("x".to_string())).is_retryable());
    assert!(!VaultError::InvalidRequest("x".to_string()).is_retryable());
}

#[test]
fn test_item_failure_from_error() {
    assert_eq!(
        ItemFailure::from(VaultError::QuotaExceeded { retry_after_ms: 7 }),
        ItemFailure::QuotaExceeded { retry_after_ms: 7 }
    );
    assert_eq!(
        ItemFailure::from(VaultError::Template("missing".to_string())),
        ItemFailure::Template("missing".to_string())
    );
    assert!(matches!(
        ItemFailure::from(VaultError::Config("x".to_string())),
        ItemFailure::Internal(_)
    ));
}

#[test]
fn test_item_failure_serializes_tagged() {
    let json = serde_json::to_value(ItemFailure::QuotaExceeded { retry_after_ms: 10 }).unwrap();
    assert_eq!(json["kind"], "quota_exceeded");
    assert_eq!(json["detail"]["retry_after_ms"], 10);

    let json = serde_json::to_value(ItemFailure::Generation(GenerationFailure::Timeout(5))).unwrap();
    assert_eq!(json["kind"], "generation");
    assert_eq!(json["detail"]["kind"], "timeout");
}
