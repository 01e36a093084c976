//! Axum-based HTTP surface of genvault.
//!
//! Exposes single and batch generation through the orchestrator, the signed
//! audit trail, health and Prometheus metrics. The caller identity is the
//! `x-owner-id` header; quota denials come back as 429 with a
//! `retry-after-ms` header.
//!
//! # Components
//!
//! - `handlers`: Endpoint implementations and the owner extractor.
//! - `middleware`: Request id propagation and request metrics.
//! - `routes`: The router tying everything together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod handlers;
mod middleware;
mod routes;

pub use handlers::{Owner, MAX_BATCH_ITEMS, OWNER_HEADER};
pub use routes::{create_router, AppState};
