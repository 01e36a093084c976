// Cache key derivation - deterministic fingerprints of normalized inputs
// Author: kelexine (https://github.com/kelexine)

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

static WHITESPACE: OnceLock<Regex> = OnceLock::new();

fn whitespace() -> &'static Regex {
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Content-addressed key of one logical request.
///
/// `fingerprint` is the SHA-256 hex of `canonical`, the normalized JSON
/// rendering of the inputs. The similarity tier compares `canonical` forms,
/// and only between keys of the same `scope`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    fingerprint: String,
    canonical: String,
    scope: String,
}

impl CacheKey {
    /// Normalize `inputs` and fingerprint them.
    ///
    /// Object keys are sorted recursively and string whitespace is trimmed
    /// and collapsed, so neither map iteration order nor incidental spacing
    /// changes the key.
    pub fn derive(inputs: &Value) -> Self {
        let canonical = normalize(inputs).to_string();
        Self {
            fingerprint: fingerprint(&canonical),
            canonical,
            scope: String::new(),
        }
    }

    /// Restrict near-duplicate matching to keys with the same scope.
    /// The fingerprint is unaffected.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Rebuild a key from stored parts; the fingerprint is recomputed.
    pub fn from_canonical(canonical: impl Into<String>) -> Self {
        let canonical = canonical.into();
        Self {
            fingerprint: fingerprint(&canonical),
            canonical,
            scope: String::new(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Digest used to correlate audit events with this key.
    pub fn audit_digest(&self) -> String {
        crate::audit::digest(self.fingerprint.as_bytes())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(crate::integrity::short(&self.fingerprint))
    }
}

fn fingerprint(canonical: &str) -> String {
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Whether `s` looks like a fingerprint (64 lowercase hex chars).
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(whitespace().replace_all(s.trim(), " ").into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), normalize(&map[key]));
            }
            Value::Object(sorted)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_inputs_same_key() {
        let a = CacheKey::derive(&json!({"topic": "rust", "len": 3}));
        let b = CacheKey::derive(&json!({"len": 3, "topic": "rust"}));
        assert_eq!(a, b);
        assert!(is_fingerprint(a.fingerprint()));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let a = CacheKey::derive(&json!({"prompt": "  write   about\n rust "}));
        let b = CacheKey::derive(&json!({"prompt": "write about rust"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_order_independent() {
        let a = CacheKey::derive(&json!({"outer": {"x": 1, "y": [ {"b": 1, "a": 2} ]}}));
        let b = CacheKey::derive(&json!({"outer": {"y": [ {"a": 2, "b": 1} ], "x": 1}}));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_different_values_differ() {
        let a = CacheKey::derive(&json!({"topic": "rust"}));
        let b = CacheKey::derive(&json!({"topic": "go"}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_scope_leaves_fingerprint_alone() {
        let plain = CacheKey::derive(&json!({"topic": "rust"}));
        let scoped = CacheKey::derive(&json!({"topic": "rust"})).with_scope("essay");
        assert_eq!(plain.fingerprint(), scoped.fingerprint());
        assert_eq!(scoped.scope(), "essay");
    }

    #[test]
    fn test_is_fingerprint_rejects_paths() {
        assert!(!is_fingerprint("../../etc/passwd"));
        assert!(!is_fingerprint(&"A".repeat(64)));
    }
}
