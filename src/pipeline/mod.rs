//! Generation pipeline seam.
//!
//! The orchestrator hands a rendered prompt to a [`GenerationPipeline`] and
//! gets back generated bytes or a typed [`GenerationFailure`]. The crate ships
//! an HTTP implementation; tests plug in their own.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod http;

pub use http::HttpPipeline;

use crate::error::GenerationFailure;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;

/// What the pipeline receives for one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineInput {
    pub template_id: String,
    /// Rendered template text.
    pub prompt: String,
    /// Time budget for the call.
    #[serde(rename = "deadline_ms", serialize_with = "as_millis")]
    pub deadline: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    async fn generate(&self, input: PipelineInput) -> std::result::Result<Bytes, GenerationFailure>;
}
