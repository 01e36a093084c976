// Batch job and per-item result models
// Author: kelexine (https://github.com/kelexine)

use crate::cache::TierKind;
use crate::error::GenerationFailure;
use crate::models::GenerationRequest;
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// An ordered batch of generation requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub items: Vec<GenerationRequest>,

    /// Maximum simultaneous generation calls. Falls back to the configured
    /// default and is never above the owner's in-flight quota.
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
}

impl BatchJob {
    pub fn new(items: Vec<GenerationRequest>, concurrency_limit: usize) -> Self {
        Self {
            items,
            concurrency_limit: Some(concurrency_limit),
        }
    }

    pub fn single(request: GenerationRequest) -> Self {
        Self {
            items: vec![request],
            concurrency_limit: Some(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Why one item did not produce content.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ItemFailure {
    #[error("quota exceeded, retry after {retry_after_ms}ms")]
    QuotaExceeded { retry_after_ms: u64 },

    #[error(transparent)]
    Generation(GenerationFailure),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ItemFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemFailure::QuotaExceeded { .. } => "quota_exceeded",
            ItemFailure::Generation(GenerationFailure::Timeout(_)) => "timeout",
            ItemFailure::Generation(_) => "generation_failed",
            ItemFailure::Cancelled => "cancelled",
            ItemFailure::InvalidRequest(_) => "invalid_request",
            ItemFailure::Template(_) => "template_error",
            ItemFailure::Internal(_) => "internal_error",
        }
    }
}

impl From<crate::error::VaultError> for ItemFailure {
    fn from(e: crate::error::VaultError) -> Self {
        use crate::error::VaultError;
        match e {
            VaultError::QuotaExceeded { retry_after_ms } => ItemFailure::QuotaExceeded { retry_after_ms },
            VaultError::Generation(failure) => ItemFailure::Generation(failure),
            VaultError::Cancelled => ItemFailure::Cancelled,
            VaultError::InvalidRequest(msg) => ItemFailure::InvalidRequest(msg),
            VaultError::Template(msg) => ItemFailure::Template(msg),
            other => ItemFailure::Internal(other.to_string()),
        }
    }
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    Success {
        #[serde(rename = "content", serialize_with = "lossy_text")]
        payload: Bytes,
        /// Served from cache rather than generated.
        cached: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tier: Option<TierKind>,
    },
    Failure {
        error: ItemFailure,
    },
}

fn lossy_text<S: Serializer>(payload: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(payload))
}

impl ItemResult {
    pub fn generated(payload: Bytes) -> Self {
        ItemResult::Success {
            payload,
            cached: false,
            tier: None,
        }
    }

    pub fn cached(payload: Bytes, tier: TierKind) -> Self {
        ItemResult::Success {
            payload,
            cached: true,
            tier: Some(tier),
        }
    }

    pub fn failed(error: ItemFailure) -> Self {
        ItemResult::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemResult::Success { .. })
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ItemResult::Success { cached: true, .. })
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            ItemResult::Success { payload, .. } => Some(payload),
            ItemResult::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match self {
            ItemResult::Failure { error } => Some(error),
            ItemResult::Success { .. } => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            ItemResult::Success { cached: true, .. } => "cached",
            ItemResult::Success { .. } => "generated",
            ItemResult::Failure { error } => error.as_str(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
    pub cancelled: usize,
}

/// Results in input order, plus totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResults {
    pub results: Vec<ItemResult>,
    pub summary: BatchSummary,
}

impl BatchResults {
    pub fn from_results(results: Vec<ItemResult>) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in &results {
            match result {
                ItemResult::Success { cached, .. } => {
                    summary.succeeded += 1;
                    if *cached {
                        summary.cached += 1;
                    }
                }
                ItemResult::Failure { error } => {
                    summary.failed += 1;
                    if *error == ItemFailure::Cancelled {
                        summary.cancelled += 1;
                    }
                }
            }
        }
        Self { results, summary }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
