// HTTP generation pipeline tests against a mock upstream
// Author: kelexine (https://github.com/kelexine)

use genvault::config::PipelineConfig;
use genvault::error::GenerationFailure;
use genvault::pipeline::{GenerationPipeline, HttpPipeline, PipelineInput};
use mockito::{Matcher, Server};
use serde_json::json;
use std::time::Duration;

fn pipeline(server: &Server, max_retries: u32) -> HttpPipeline {
    HttpPipeline::new(&PipelineConfig {
        endpoint: format!("{}/v1/generate", server.url()),
        timeout_seconds: 5,
        max_retries,
    })
    .unwrap()
}

fn input() -> PipelineInput {
    PipelineInput {
        template_id: "greet".to_string(),
        prompt: "Hello, Ada!".to_string(),
        deadline: Duration::from_millis(2_000),
    }
}

#[tokio::test]
async fn test_success_returns_body_and_sends_prompt() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/generate")
        .match_body(Matcher::Json(json!({
            "template_id": "greet",
            "prompt": "Hello, Ada!",
            "deadline_ms": 2000
        })))
        .with_status(200)
        .with_body("generated content")
        .create_async()
        .await;

    let output = pipeline(&server, 0).generate(input()).await.unwrap();
    assert_eq!(&output[..], b"generated content");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_bad_request_is_validation_failure() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/generate")
        .with_status(422)
        .with_body("prompt too long")
        .expect(1)
        .create_async()
        .await;

    let failure = pipeline(&server, 3).generate(input()).await.unwrap_err();
    assert_eq!(failure, GenerationFailure::Validation("prompt too long".to_string()));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gateway_timeout_is_timeout_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/generate")
        .with_status(504)
        .create_async()
        .await;

    let failure = pipeline(&server, 3).generate(input()).await.unwrap_err();
    assert_eq!(failure, GenerationFailure::Timeout(2_000));
}

#[tokio::test]
async fn test_unavailable_is_retried_then_provider_failure() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/generate")
        .with_status(503)
        .with_header("retry-after", "0")
        .with_body("overloaded")
        .expect(3)
        .create_async()
        .await;

    let failure = pipeline(&server, 2).generate(input()).await.unwrap_err();
    match failure {
        GenerationFailure::Provider(detail) => {
            assert!(detail.contains("503"));
            assert!(detail.contains("overloaded"));
        }
        other => panic!("expected provider failure, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upstream_secrets_are_redacted_from_failures() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/generate")
        .with_status(500)
        .with_body("invalid api key 00112233445566778899aabbccddeeff0011")
        .create_async()
        .await;

    let failure = pipeline(&server, 0).generate(input()).await.unwrap_err();
    match failure {
        GenerationFailure::Provider(detail) => {
            assert!(!detail.contains("00112233445566778899aabbccddeeff0011"));
            assert!(detail.contains("[REDACTED_SECRET]"));
        }
        other => panic!("expected provider failure, got {:?}", other),
    }
}
