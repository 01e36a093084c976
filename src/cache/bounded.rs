// Bounded TTL cache with tunable recency/frequency eviction
// Author: kelexine (https://github.com/kelexine)

use crate::config::EvictionConfig;
use lru::LruCache;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    ttl: Duration,
    expires_at: Instant,
    hits: u64,
}

/// A capacity- and TTL-bounded map.
///
/// Recency order comes from the underlying LRU list. When full, the victim is
/// chosen among the `sample` least-recent entries: expired entries go first,
/// otherwise the lowest score of
/// `(1 - w) * recency_rank + w * relative_frequency` loses, where `w` is the
/// configured frequency weight. `w = 0` degenerates to plain LRU.
pub struct BoundedCache<K: Hash + Eq, V> {
    entries: LruCache<K, Slot<V>>,
    capacity: usize,
    default_ttl: Duration,
    sliding_ttl: bool,
    eviction: EvictionConfig,
}

impl<K: Hash + Eq + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Duration, eviction: EvictionConfig) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity: capacity.max(1),
            default_ttl,
            sliding_ttl: false,
            eviction,
        }
    }

    /// Restart an entry's TTL on every hit.
    pub fn with_sliding_ttl(mut self, sliding: bool) -> Self {
        self.sliding_ttl = sliding;
        self
    }

    /// Insert with the default TTL. Returns entries evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let ttl = self.default_ttl;
        self.insert_with_ttl(key, value, ttl)
    }

    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) -> Vec<(K, V)> {
        let now = Instant::now();
        let hits = self.entries.pop(&key).map(|slot| slot.hits).unwrap_or(0);

        let mut evicted = Vec::new();
        while self.entries.len() >= self.capacity {
            match self.pick_victim(now) {
                Some(victim) => {
                    if let Some(slot) = self.entries.pop(&victim) {
                        evicted.push((victim, slot.value));
                    }
                }
                None => break,
            }
        }

        self.entries.put(
            key,
            Slot {
                value,
                ttl,
                expires_at: now + ttl,
                hits,
            },
        );
        evicted
    }

    /// Fetch a live entry, bumping recency and hit count. Expired entries are
    /// dropped and reported as absent.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.peek(key) {
            Some(slot) => slot.expires_at <= now,
            None => return None,
        };
        if expired {
            self.entries.pop(key);
            return None;
        }

        let sliding = self.sliding_ttl;
        let slot = self.entries.get_mut(key)?;
        slot.hits += 1;
        if sliding {
            slot.expires_at = now + slot.ttl;
        }
        Some(slot.value.clone())
    }

    /// Hit count of a live entry, without touching recency.
    pub fn hits(&self, key: &K) -> Option<u64> {
        self.entries.peek(key).map(|slot| slot.hits)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|slot| slot.value)
    }

    /// Live entries, most recent first. Does not change recency.
    pub fn iter_live(&self) -> impl Iterator<Item = (&K, &V)> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(move |(_, slot)| slot.expires_at > now)
            .map(|(k, slot)| (k, &slot.value))
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn pick_victim(&self, now: Instant) -> Option<K> {
        let sample = self.eviction.sample.max(1);
        // least recent first
        let candidates: Vec<(&K, &Slot<V>)> = self.entries.iter().rev().take(sample).collect();
        if candidates.is_empty() {
            return None;
        }

        if let Some((key, _)) = candidates.iter().find(|(_, slot)| slot.expires_at <= now) {
            return Some((*key).clone());
        }

        let weight = self.eviction.frequency_weight.clamp(0.0, 1.0);
        if weight == 0.0 {
            return Some(candidates[0].0.clone());
        }

        let max_hits = candidates.iter().map(|(_, s)| s.hits).max().unwrap_or(0).max(1) as f64;
        let span = (candidates.len().max(2) - 1) as f64;

        candidates
            .iter()
            .enumerate()
            .map(|(rank, (key, slot))| {
                let recency = rank as f64 / span;
                let frequency = slot.hits as f64 / max_hits;
                ((1.0 - weight) * recency + weight * frequency, *key)
            })
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, key)| key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lru(capacity: usize) -> BoundedCache<&'static str, u32> {
        BoundedCache::new(capacity, Duration::from_secs(60), EvictionConfig::default())
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = lru(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, vec![("b", 2)]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lfu_weight_keeps_frequent_entry() {
        let mut cache = BoundedCache::new(
            2,
            Duration::from_secs(60),
            EvictionConfig {
                frequency_weight: 1.0,
                sample: 8,
            },
        );
        cache.insert("hot", 1);
        for _ in 0..5 {
            cache.get(&"hot");
        }
        cache.insert("cold", 2);
        cache.get(&"cold");
        // "hot" is now least recent but far more frequent
        let evicted = cache.insert("new", 3);
        assert_eq!(evicted, vec![("cold", 2)]);
        assert_eq!(cache.hits(&"hot"), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let mut cache = lru(4);
        cache.insert_with_ttl("a", 1, Duration::from_secs(5));
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_ttl() {
        let mut cache = lru(4).with_sliding_ttl(true);
        cache.insert_with_ttl("a", 1, Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_first() {
        let mut cache = lru(2);
        cache.insert_with_ttl("short", 1, Duration::from_secs(1));
        cache.insert_with_ttl("long", 2, Duration::from_secs(100));
        cache.get(&"short");
        tokio::time::advance(Duration::from_secs(2)).await;
        let evicted = cache.insert("new", 3);
        assert_eq!(evicted, vec![("short", 1)]);
    }
}
