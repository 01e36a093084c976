//! Template cache.
//!
//! Holds raw and compiled templates keyed by template id, bounded by
//! capacity and TTL with the same eviction policy family as the fast cache
//! tier. Templates are shared, non-sensitive artifacts, so entries are
//! neither owner-scoped nor sealed.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod source;

pub use source::{DirectorySource, InMemorySource, TemplateSource};

use crate::cache::BoundedCache;
use crate::config::TemplateConfig;
use crate::error::{Result, VaultError};
use crate::models::is_valid_template_id;
use chrono::{DateTime, Utc};
use minijinja::{Environment, UndefinedBehavior};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A compiled template and the text it was compiled from.
pub struct TemplateCacheEntry {
    pub template_id: String,
    pub raw_content: Arc<str>,
    pub compiled_at: DateTime<Utc>,
    compiled: Environment<'static>,
}

impl TemplateCacheEntry {
    /// Parse `raw` into a standalone environment.
    ///
    /// Undefined variables are errors, so a request missing a parameter fails
    /// validation instead of rendering a hole.
    pub fn compile(template_id: &str, raw: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template_owned(template_id.to_string(), raw.to_string())?;
        Ok(Self {
            template_id: template_id.to_string(),
            raw_content: Arc::from(raw),
            compiled_at: Utc::now(),
            compiled: env,
        })
    }

    pub fn render(&self, params: &Map<String, Value>) -> Result<String> {
        let template = self.compiled.get_template(&self.template_id)?;
        Ok(template.render(params)?)
    }
}

impl std::fmt::Debug for TemplateCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCacheEntry")
            .field("template_id", &self.template_id)
            .field("raw_len", &self.raw_content.len())
            .field("compiled_at", &self.compiled_at)
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateStats {
    pub hits: u64,
    pub misses: u64,
    pub compiles: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Bounded, TTL-evicted cache of compiled templates.
pub struct TemplateCache {
    source: Arc<dyn TemplateSource>,
    entries: Mutex<BoundedCache<String, Arc<TemplateCacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    pub fn new(config: &TemplateConfig, source: Arc<dyn TemplateSource>) -> Self {
        let ttl = Duration::from_secs(config.ttl_seconds);
        Self {
            source,
            entries: Mutex::new(
                BoundedCache::new(config.capacity, ttl, config.eviction).with_sliding_ttl(true),
            ),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compiles: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache backed by the configured template directory.
    pub fn from_config(config: &TemplateConfig) -> Self {
        Self::new(config, Arc::new(DirectorySource::new(&config.directory)))
    }

    /// Compiled form of `template_id`, loading and compiling it on a miss.
    pub fn get(&self, template_id: &str) -> Result<Arc<TemplateCacheEntry>> {
        if !is_valid_template_id(template_id) {
            return Err(VaultError::InvalidRequest(format!(
                "invalid template id: {:?}",
                crate::utils::logging::truncate(template_id, 64)
            )));
        }

        if let Some(entry) = self.entries.lock().get(&template_id.to_string()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_template_op("hit");
            return Ok(entry);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_template_op("miss");

        let raw = self
            .source
            .load(template_id)?
            .ok_or_else(|| VaultError::Template(format!("template not found: {}", template_id)))?;
        let entry = Arc::new(TemplateCacheEntry::compile(template_id, &raw)?);
        self.compiles.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_template_op("compile");
        debug!("Compiled template {} ({} bytes)", template_id, raw.len());

        // a concurrent miss may have compiled it too; last write wins
        let evicted = self
            .entries
            .lock()
            .insert(template_id.to_string(), Arc::clone(&entry));
        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            crate::metrics::record_template_op("evict");
        }
        Ok(entry)
    }

    /// Render `template_id` with `params`.
    pub fn render(&self, template_id: &str, params: &Map<String, Value>) -> Result<String> {
        self.get(template_id)?.render(params)
    }

    /// Compile templates ahead of first traffic. Returns how many loaded.
    pub fn preload<I, S>(&self, template_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded = 0;
        for id in template_ids {
            match self.get(id.as_ref()) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Failed to preload template {}: {}", id.as_ref(), e),
            }
        }
        if loaded > 0 {
            info!("Preloaded {} templates", loaded);
        }
        loaded
    }

    /// Drop a cached template so the next `get` reloads it.
    pub fn invalidate(&self, template_id: &str) -> bool {
        self.entries.lock().remove(&template_id.to_string()).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        self.entries.lock().purge_expired()
    }

    pub fn stats(&self) -> TemplateStats {
        TemplateStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(source: InMemorySource, capacity: usize) -> TemplateCache {
        let config = TemplateConfig {
            capacity,
            ..Default::default()
        };
        TemplateCache::new(&config, Arc::new(source))
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_compiles_once() {
        let cache = cache(InMemorySource::new().with("hello", "Hello {{ name }}!"), 4);
        let out = cache.render("hello", &params(json!({"name": "Ada"}))).unwrap();
        assert_eq!(out, "Hello Ada!");
        cache.render("hello", &params(json!({"name": "Bob"}))).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.compiles, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_missing_param_is_an_error() {
        let cache = cache(InMemorySource::new().with("hello", "Hello {{ name }}!"), 4);
        assert!(matches!(
            cache.render("hello", &Map::new()),
            Err(VaultError::Template(_))
        ));
    }

    #[test]
    fn test_unknown_and_invalid_ids() {
        let cache = cache(InMemorySource::new(), 4);
        assert!(matches!(cache.get("nope"), Err(VaultError::Template(_))));
        assert!(matches!(cache.get("../x"), Err(VaultError::InvalidRequest(_))));
    }

    #[test]
    fn test_capacity_bound_and_invalidate() {
        let source = InMemorySource::new().with("a", "A").with("b", "B").with("c", "C");
        let cache = cache(source, 2);
        assert_eq!(cache.preload(["a", "b", "c"]), 3);
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 1);

        assert!(cache.invalidate("c"));
        assert!(!cache.invalidate("c"));
    }

    #[test]
    fn test_raw_content_is_kept() {
        let cache = cache(InMemorySource::new().with("t", "{{ x }}"), 4);
        let entry = cache.get("t").unwrap();
        assert_eq!(&*entry.raw_content, "{{ x }}");
    }
}
