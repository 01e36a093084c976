// HTTP routes configuration
// Author: kelexine (https://github.com/kelexine)

use super::handlers::{
    audit_export_handler, batch_handler, generate_handler, health_handler, metrics_handler,
};
use super::middleware::{request_id_layers, track_metrics};
use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Orchestrator,
    pub audit: Arc<AuditLog>,
}

pub fn create_router(config: AppConfig, orchestrator: Orchestrator, audit: Arc<AuditLog>) -> Router {
    let body_limit = config.server.body_limit_bytes;
    let state = AppState {
        config: Arc::new(config),
        orchestrator,
        audit,
    };

    let (set_request_id, propagate_request_id) = request_id_layers();

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/generate", post(generate_handler))
        .route("/v1/batch", post(batch_handler))
        .route("/v1/audit/export", get(audit_export_handler))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}
