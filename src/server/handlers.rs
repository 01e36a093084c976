// HTTP request handlers
// Author: kelexine (https://github.com/kelexine)

use super::routes::AppState;
use crate::audit::AuditSegment;
use crate::error::{Result, VaultError};
use crate::models::{validate_owner_id, GenerationRequest};
use crate::orchestrator::{BatchJob, BatchResults, CancelToken, ItemFailure, ItemResult};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Header carrying the caller identity.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Largest batch accepted in one request.
pub const MAX_BATCH_ITEMS: usize = 1024;

/// Caller identity taken from the `x-owner-id` header.
#[derive(Debug, Clone)]
pub struct Owner(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = VaultError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let owner = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| VaultError::InvalidRequest(format!("missing {} header", OWNER_HEADER)))?
            .to_str()
            .map_err(|_| VaultError::InvalidRequest(format!("{} must be visible ASCII", OWNER_HEADER)))?
            .trim()
            .to_string();
        validate_owner_id(&owner)?;
        Ok(Owner(owner))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    let mut overall_status = HealthStatus::Healthy;

    let cache = state.orchestrator.cache();
    let stats = cache.stats();
    checks.insert(
        "cache".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: format!(
                "{} fast, {} similarity, {} persistent entries",
                stats.fast.entries, stats.similarity.entries, stats.persistent.entries
            ),
        },
    );

    if let Some(persistent) = cache.persistent() {
        let used = persistent.used_bytes();
        let quota = persistent.quota_bytes();
        // above 90% of the disk budget stores start getting rejected soon
        let check = if quota > 0 && used.saturating_mul(10) >= quota.saturating_mul(9) {
            overall_status = HealthStatus::Degraded;
            HealthCheck {
                status: "warning".to_string(),
                message: format!("Disk quota nearly exhausted: {} of {} bytes", used, quota),
            }
        } else {
            HealthCheck {
                status: "ok".to_string(),
                message: format!("{} of {} bytes used", used, quota),
            }
        };
        checks.insert("persistent_quota".to_string(), check);
    }

    checks.insert(
        "audit".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: format!("{} events retained", state.audit.len()),
        },
    );

    let limiter = state.orchestrator.limiter();
    let usage = limiter.deployment_usage();
    checks.insert(
        "admission".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: format!(
                "{} owners tracked, {} requests in flight",
                limiter.tracked_owners(),
                usage.in_flight
            ),
        },
    );

    Json(HealthResponse {
        status: overall_status,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_metrics(),
    )
}

/// Handler for `POST /v1/generate`.
pub async fn generate_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<ItemResult>> {
    debug!("Generate request for template {}", request.template_id);
    match state.orchestrator.submit(request, &owner).await {
        ItemResult::Failure { error } => Err(failure_to_error(error)),
        success => Ok(Json(success)),
    }
}

/// Handler for `POST /v1/batch`. Dropping the request cancels queued items.
pub async fn batch_handler(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(job): Json<BatchJob>,
) -> Result<Json<BatchResults>> {
    if job.is_empty() {
        return Err(VaultError::InvalidRequest("batch has no items".to_string()));
    }
    if job.len() > MAX_BATCH_ITEMS {
        return Err(VaultError::InvalidRequest(format!(
            "batch has {} items (max {})",
            job.len(),
            MAX_BATCH_ITEMS
        )));
    }

    info!("Received batch request: {} items", job.len());
    let cancel = CancelOnDrop(CancelToken::new());
    let results = state.orchestrator.run(job, &owner, cancel.0.clone()).await;
    Ok(Json(results))
}

/// Handler for `GET /v1/audit/export`.
pub async fn audit_export_handler(State(state): State<AppState>) -> Json<Vec<AuditSegment>> {
    Json(state.audit.export())
}

struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Status mapping for a single-request failure.
fn failure_to_error(failure: ItemFailure) -> VaultError {
    match failure {
        ItemFailure::QuotaExceeded { retry_after_ms } => VaultError::QuotaExceeded { retry_after_ms },
        ItemFailure::Generation(failure) => VaultError::Generation(failure),
        ItemFailure::Cancelled => VaultError::Cancelled,
        ItemFailure::InvalidRequest(msg) => VaultError::InvalidRequest(msg),
        ItemFailure::Template(msg) => VaultError::Template(msg),
        ItemFailure::Internal(msg) => VaultError::Internal(msg),
    }
}
