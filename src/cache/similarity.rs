// Similarity tier - per-owner near-duplicate matching
// Author: kelexine (https://github.com/kelexine)

use super::bounded::BoundedCache;
use super::key::CacheKey;
use super::models::{CacheEntry, RejectReason, TierCounters, TierKind};
use super::tier::{check_binding, CacheTier, TierLookup};
use crate::config::{EvictionConfig, SimilarityTierConfig};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Distance between two canonical request texts, in `[0, 1]`.
pub trait SimilarityMatcher: Send + Sync {
    fn distance(&self, a: &str, b: &str) -> f64;

    /// Cheap lower bound on `distance`; pairs whose bound already exceeds
    /// the threshold are skipped.
    fn lower_bound(&self, a: &str, b: &str) -> f64 {
        let (la, lb) = (a.chars().count(), b.chars().count());
        let longest = la.max(lb);
        if longest == 0 {
            return 0.0;
        }
        la.abs_diff(lb) as f64 / longest as f64
    }
}

/// Levenshtein distance divided by the longer length.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedLevenshtein;

impl SimilarityMatcher for NormalizedLevenshtein {
    fn distance(&self, a: &str, b: &str) -> f64 {
        1.0 - strsim::normalized_levenshtein(a, b)
    }
}

/// (owner, scope) partition of the index.
type IndexKey = (String, String);

/// Per-owner index answering "is there a stored request close enough to this one".
///
/// Candidates are only compared within the same key scope, so requests for
/// two different templates never stand in for each other however close
/// their text is.
pub struct SimilarityTier {
    owners: DashMap<IndexKey, BoundedCache<String, CacheEntry>>,
    matcher: Arc<dyn SimilarityMatcher>,
    threshold: f64,
    capacity_per_owner: usize,
    ttl: Duration,
    counters: TierCounters,
}

impl SimilarityTier {
    pub fn new(config: &SimilarityTierConfig) -> Self {
        Self::with_matcher(config, Arc::new(NormalizedLevenshtein))
    }

    pub fn with_matcher(config: &SimilarityTierConfig, matcher: Arc<dyn SimilarityMatcher>) -> Self {
        Self {
            owners: DashMap::new(),
            matcher,
            threshold: config.threshold.clamp(0.0, 1.0),
            capacity_per_owner: config.capacity_per_owner.max(1),
            ttl: config.ttl(),
            counters: TierCounters::default(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn index_key(key: &CacheKey, owner_id: &str) -> IndexKey {
        (owner_id.to_string(), key.scope().to_string())
    }

    /// Closest live entry within the threshold, exact matches first.
    fn nearest(&self, index: &BoundedCache<String, CacheEntry>, key: &CacheKey) -> Option<(String, f64)> {
        if index.iter_live().any(|(fp, _)| fp == key.fingerprint()) {
            return Some((key.fingerprint().to_string(), 0.0));
        }

        let query = key.canonical();
        let mut best: Option<(String, f64)> = None;
        for (fingerprint, entry) in index.iter_live() {
            if self.matcher.lower_bound(query, &entry.canonical) > self.threshold {
                continue;
            }
            let distance = self.matcher.distance(query, &entry.canonical);
            if distance <= self.threshold && best.as_ref().map_or(true, |(_, d)| distance < *d) {
                best = Some((fingerprint.clone(), distance));
            }
        }
        best
    }
}

#[async_trait]
impl CacheTier for SimilarityTier {
    fn kind(&self) -> TierKind {
        TierKind::Similarity
    }

    async fn get(&self, key: &CacheKey, owner_id: &str) -> TierLookup {
        let Some(mut index) = self.owners.get_mut(&Self::index_key(key, owner_id)) else {
            return TierLookup::NotFound;
        };

        let Some((fingerprint, distance)) = self.nearest(&index, key) else {
            return TierLookup::NotFound;
        };

        let hits = index.hits(&fingerprint).unwrap_or(0);
        match index.get(&fingerprint) {
            Some(mut entry) => {
                if distance > 0.0 {
                    debug!(
                        "Similarity match for {} at distance {:.3} (stored {})",
                        key,
                        distance,
                        crate::integrity::short(&fingerprint)
                    );
                }
                entry.key = fingerprint;
                entry.hit_count = hits + 1;
                entry.last_access = Utc::now();
                TierLookup::Found(entry)
            }
            None => TierLookup::NotFound,
        }
    }

    async fn put(&self, key: &CacheKey, owner_id: &str, entry: CacheEntry) -> Result<(), RejectReason> {
        check_binding(key, owner_id, &entry)?;
        if entry.canonical != key.canonical() {
            return Err(RejectReason::KeyMismatch);
        }
        let capacity = self.capacity_per_owner;
        let ttl = self.ttl;
        let mut index = self
            .owners
            .entry(Self::index_key(key, owner_id))
            .or_insert_with(|| BoundedCache::new(capacity, ttl, EvictionConfig::default()));
        let evicted = index.insert(key.fingerprint().to_string(), entry.for_tier(TierKind::Similarity));
        self.counters.evicted(evicted.len());
        self.counters.store();
        Ok(())
    }

    async fn remove(&self, fingerprint: &str, owner_id: &str) -> bool {
        let fingerprint = fingerprint.to_string();
        let mut removed = false;
        for mut index in self.owners.iter_mut() {
            if index.key().0 == owner_id {
                removed |= index.remove(&fingerprint).is_some();
            }
        }
        removed
    }

    async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for mut index in self.owners.iter_mut() {
            purged += index.purge_expired();
        }
        self.owners.retain(|_, index| !index.is_empty());
        self.counters.evicted(purged);
        purged
    }

    async fn clear(&self) {
        self.owners.clear();
    }

    fn len(&self) -> usize {
        self.owners.iter().map(|index| index.len()).sum()
    }

    fn counters(&self) -> &TierCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance_bounds() {
        let m = NormalizedLevenshtein;
        assert_eq!(m.distance("abc", "abc"), 0.0);
        assert!((m.distance("abc", "xyz") - 1.0).abs() < 1e-9);
        assert!(m.distance("write about rust", "write about rusts") < 0.1);
    }

    #[test]
    fn test_lower_bound_never_exceeds_distance() {
        let m = NormalizedLevenshtein;
        for (a, b) in [("kitten", "sitting"), ("", "abc"), ("rust", "rust lang")] {
            assert!(m.lower_bound(a, b) <= m.distance(a, b) + 1e-9);
        }
    }
}
