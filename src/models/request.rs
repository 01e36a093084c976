// Generation request and caller identity
// Author: kelexine (https://github.com/kelexine)

use crate::cache::{CacheKey, TierHint};
use crate::error::{Result, VaultError};
use crate::ratelimit::ResourceClaim;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use uuid::Uuid;

/// Upper bound on serialized params accepted from a caller.
pub const MAX_PARAMS_BYTES: usize = 1024 * 1024;

/// Upper bound on an owner id.
pub const MAX_OWNER_ID_LEN: usize = 256;

static TEMPLATE_ID: OnceLock<Regex> = OnceLock::new();

fn template_id_pattern() -> &'static Regex {
    TEMPLATE_ID.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("static regex")
    })
}

/// Whether `id` is a well-formed template id (no path separators, no `..`).
pub fn is_valid_template_id(id: &str) -> bool {
    template_id_pattern().is_match(id) && !id.contains("..")
}

/// One generation request as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub template_id: String,

    #[serde(default)]
    pub params: Map<String, Value>,

    /// Token cost charged by the rate limiter.
    #[serde(default = "default_cost")]
    pub cost: u32,

    /// Per-call deadline overriding the orchestrator default.
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Slowest cache tier the result is written to.
    #[serde(default)]
    pub tier_hint: Option<TierHint>,
}

fn default_cost() -> u32 {
    1
}

impl GenerationRequest {
    pub fn new(template_id: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            template_id: template_id.into(),
            params,
            cost: default_cost(),
            deadline_ms: None,
            tier_hint: None,
        }
    }

    /// Reject hostile or malformed input before it touches any component.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_template_id(&self.template_id) {
            return Err(VaultError::InvalidRequest(format!(
                "invalid template id: {:?}",
                crate::utils::logging::truncate(&self.template_id, 64)
            )));
        }
        if self.cost == 0 {
            return Err(VaultError::InvalidRequest("cost must be at least 1".to_string()));
        }
        if self.deadline_ms == Some(0) {
            return Err(VaultError::InvalidRequest("deadline_ms must be positive".to_string()));
        }
        let size = serde_json::to_vec(&self.params)?.len();
        if size > MAX_PARAMS_BYTES {
            return Err(VaultError::InvalidRequest(format!(
                "params too large: {} bytes (max {})",
                size, MAX_PARAMS_BYTES
            )));
        }
        Ok(())
    }

    /// Content-addressed cache key of this request, scoped to its template.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&json!({
            "template_id": self.template_id,
            "params": Value::Object(self.params.clone()),
        }))
        .with_scope(self.template_id.clone())
    }

    /// Resources reserved with the rate limiter while this request runs.
    pub fn claim(&self) -> ResourceClaim {
        let params_bytes = serde_json::to_vec(&self.params).map(|v| v.len()).unwrap_or(0) as u64;
        ResourceClaim {
            tokens: self.cost,
            // rendered prompt plus generated output, roughly
            memory_bytes: params_bytes.saturating_mul(4).max(4 * 1024),
            cpu_units: self.cost as u64,
        }
    }
}

/// Who is asking, and which trail their events belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
    pub owner_id: String,
    pub correlation_id: String,
}

impl Caller {
    /// A caller with a fresh correlation id.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation(owner_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_owner_id(&self.owner_id)
    }
}

pub fn validate_owner_id(owner_id: &str) -> Result<()> {
    if owner_id.is_empty() || owner_id.len() > MAX_OWNER_ID_LEN {
        return Err(VaultError::InvalidRequest(format!(
            "owner id must be 1..={} bytes",
            MAX_OWNER_ID_LEN
        )));
    }
    if owner_id.chars().any(char::is_control) {
        return Err(VaultError::InvalidRequest(
            "owner id contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_template_id_validation() {
        assert!(is_valid_template_id("blog-post.v2"));
        assert!(!is_valid_template_id("../etc/passwd"));
        assert!(!is_valid_template_id("a/b"));
        assert!(!is_valid_template_id("a..b"));
        assert!(!is_valid_template_id(""));
    }

    #[test]
    fn test_request_validation() {
        let mut req = GenerationRequest::new("summary", params(json!({"topic": "rust"})));
        assert!(req.validate().is_ok());

        req.cost = 0;
        assert!(req.validate().is_err());

        req.cost = 1;
        req.params.insert("blob".to_string(), Value::String("x".repeat(MAX_PARAMS_BYTES)));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_cache_key_ignores_param_order() {
        let a = GenerationRequest::new("t", params(json!({"a": 1, "b": "two"})));
        let mut reordered = Map::new();
        reordered.insert("b".to_string(), json!("two"));
        reordered.insert("a".to_string(), json!(1));
        let b = GenerationRequest::new("t", reordered);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_owner_validation() {
        assert!(validate_owner_id("alice").is_ok());
        assert!(validate_owner_id("").is_err());
        assert!(validate_owner_id("a\u{0}b").is_err());
        assert!(validate_owner_id(&"x".repeat(MAX_OWNER_ID_LEN + 1)).is_err());
    }
}
