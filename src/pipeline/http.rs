// HTTP generation pipeline client
// Author: kelexine (https://github.com/kelexine)

use super::{GenerationPipeline, PipelineInput};
use crate::config::PipelineConfig;
use crate::error::{GenerationFailure, Result, VaultError};
use crate::utils::logging::{redact, truncate};
use crate::utils::retry::{parse_retry_after, with_retry, AttemptError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Synthetic status for transport failures, treated as retryable.
const TRANSPORT_FAILURE: u16 = 503;
/// Synthetic status for a client-side timeout.
const CLIENT_TIMEOUT: u16 = 408;

/// Posts `{template_id, prompt, deadline_ms}` to a generation endpoint.
///
/// Status mapping:
/// - 2xx: body is the generated content
/// - 408, 504 or a client-side timeout: [`GenerationFailure::Timeout`]
/// - 400, 422: [`GenerationFailure::Validation`]
/// - anything else: [`GenerationFailure::Provider`]
///
/// 429 and 5xx other than 504 are retried with exponential backoff,
/// honoring `Retry-After` when the server sends one.
pub struct HttpPipeline {
    http_client: Client,
    endpoint: String,
    max_attempts: u32,
}

impl HttpPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| VaultError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created pipeline client for {}", config.endpoint);

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            max_attempts: config.max_retries.saturating_add(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, input: &PipelineInput) -> std::result::Result<Bytes, AttemptError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .timeout(input.deadline)
            .json(input)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response.bytes().await.map_err(transport_error);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(AttemptError::new(status.as_u16(), body).with_retry_after(retry_after))
    }
}

fn transport_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::new(CLIENT_TIMEOUT, e.to_string())
    } else {
        AttemptError::new(TRANSPORT_FAILURE, e.to_string())
    }
}

/// Map a final failed attempt to a typed failure.
pub(crate) fn classify(error: AttemptError, deadline: Duration) -> GenerationFailure {
    let detail = redact(&truncate(&error.body, 512));
    match StatusCode::from_u16(error.status) {
        Ok(StatusCode::REQUEST_TIMEOUT) | Ok(StatusCode::GATEWAY_TIMEOUT) => {
            GenerationFailure::Timeout(deadline.as_millis() as u64)
        }
        Ok(StatusCode::BAD_REQUEST) | Ok(StatusCode::UNPROCESSABLE_ENTITY) => {
            GenerationFailure::Validation(detail)
        }
        _ => GenerationFailure::Provider(format!("status {}: {}", error.status, detail)),
    }
}

#[async_trait]
impl GenerationPipeline for HttpPipeline {
    async fn generate(&self, input: PipelineInput) -> std::result::Result<Bytes, GenerationFailure> {
        let result = with_retry("generation", self.max_attempts, || self.attempt(&input)).await;
        result.map_err(|error| {
            warn!(
                "Generation for template {} failed with status {}: {}",
                input.template_id,
                error.status,
                redact(&truncate(&error.body, 200))
            );
            classify(error, input.deadline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        let deadline = Duration::from_millis(1500);
        assert_eq!(
            classify(AttemptError::new(504, ""), deadline),
            GenerationFailure::Timeout(1500)
        );
        assert_eq!(
            classify(AttemptError::new(408, ""), deadline),
            GenerationFailure::Timeout(1500)
        );
        assert!(matches!(
            classify(AttemptError::new(422, "bad field"), deadline),
            GenerationFailure::Validation(msg) if msg == "bad field"
        ));
        assert!(matches!(
            classify(AttemptError::new(500, "boom"), deadline),
            GenerationFailure::Provider(_)
        ));
    }
}
