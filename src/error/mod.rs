// Error types for genvault
// Author: kelexine (https://github.com/kelexine)

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Typed failure reported by the external generation pipeline.
///
/// These never cross item boundaries: the orchestrator stores them in the
/// failing item's result slot.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GenerationFailure {
    #[error("generation timed out after {0}ms")]
    Timeout(u64),

    #[error("provider failure: {0}")]
    Provider(String),

    #[error("validation failure: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("Quota exceeded, retry after {retry_after_ms}ms")]
    QuotaExceeded { retry_after_ms: u64 },

    #[error("Cache store rejected: {0}")]
    CapacityRejected(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("Cancelled")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::QuotaExceeded { .. }
                | VaultError::Generation(GenerationFailure::Timeout(_))
                | VaultError::Generation(GenerationFailure::Provider(_))
        )
    }
}

impl From<minijinja::Error> for VaultError {
    fn from(e: minijinja::Error) -> Self {
        VaultError::Template(e.to_string())
    }
}

// Convert VaultError to HTTP responses for Axum
impl IntoResponse for VaultError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            VaultError::QuotaExceeded { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };

        let (status, error_type) = match &self {
            VaultError::QuotaExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
            VaultError::InvalidRequest(_) | VaultError::Json(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            VaultError::Template(_) => (StatusCode::UNPROCESSABLE_ENTITY, "template_error"),
            VaultError::Generation(GenerationFailure::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "generation_timeout")
            }
            VaultError::Generation(GenerationFailure::Validation(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "generation_validation_error")
            }
            VaultError::Generation(_) | VaultError::Http(_) => (StatusCode::BAD_GATEWAY, "api_error"),
            VaultError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            VaultError::Config(_) | VaultError::ConfigParsing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
        };

        let body = json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": crate::utils::logging::redact(&self.to_string()),
            }
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(ms) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&ms.to_string()) {
                response.headers_mut().insert("retry-after-ms", value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
