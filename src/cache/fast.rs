// Fast tier - sharded in-memory exact-match cache
// Author: kelexine (https://github.com/kelexine)

use super::bounded::BoundedCache;
use super::key::CacheKey;
use super::models::{CacheEntry, RejectReason, TierCounters, TierKind};
use super::tier::{check_binding, CacheTier, TierLookup};
use crate::config::FastTierConfig;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

type EntryKey = (String, String);

/// Exact-match tier keyed by (owner, fingerprint).
///
/// Each shard has its own lock, so writers to different keys rarely contend.
pub struct FastTier {
    shards: Vec<Mutex<BoundedCache<EntryKey, CacheEntry>>>,
    counters: TierCounters,
}

impl FastTier {
    pub fn new(config: &FastTierConfig) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard = config.capacity.div_ceil(shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(
                    BoundedCache::new(per_shard, config.ttl(), config.eviction)
                        .with_sliding_ttl(config.extend_ttl_on_hit),
                )
            })
            .collect();
        Self {
            shards,
            counters: TierCounters::default(),
        }
    }

    fn shard(&self, owner_id: &str, fingerprint: &str) -> &Mutex<BoundedCache<EntryKey, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        owner_id.hash(&mut hasher);
        fingerprint.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn entry_key(fingerprint: &str, owner_id: &str) -> EntryKey {
        (owner_id.to_string(), fingerprint.to_string())
    }
}

#[async_trait]
impl CacheTier for FastTier {
    fn kind(&self) -> TierKind {
        TierKind::Fast
    }

    async fn get(&self, key: &CacheKey, owner_id: &str) -> TierLookup {
        let entry_key = Self::entry_key(key.fingerprint(), owner_id);
        let mut shard = self.shard(owner_id, key.fingerprint()).lock();
        let hits = shard.hits(&entry_key).unwrap_or(0);
        match shard.get(&entry_key) {
            Some(mut entry) => {
                entry.key = key.fingerprint().to_string();
                entry.hit_count = hits + 1;
                entry.last_access = Utc::now();
                TierLookup::Found(entry)
            }
            None => TierLookup::NotFound,
        }
    }

    async fn put(&self, key: &CacheKey, owner_id: &str, entry: CacheEntry) -> Result<(), RejectReason> {
        check_binding(key, owner_id, &entry)?;
        let entry_key = Self::entry_key(key.fingerprint(), owner_id);
        let evicted = self
            .shard(owner_id, key.fingerprint())
            .lock()
            .insert(entry_key, entry.for_tier(TierKind::Fast));
        if !evicted.is_empty() {
            debug!("Fast tier evicted {} entries", evicted.len());
            self.counters.evicted(evicted.len());
        }
        self.counters.store();
        Ok(())
    }

    async fn remove(&self, fingerprint: &str, owner_id: &str) -> bool {
        self.shard(owner_id, fingerprint)
            .lock()
            .remove(&Self::entry_key(fingerprint, owner_id))
            .is_some()
    }

    async fn purge_expired(&self) -> usize {
        let purged: usize = self.shards.iter().map(|s| s.lock().purge_expired()).sum();
        self.counters.evicted(purged);
        purged
    }

    async fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn counters(&self) -> &TierCounters {
        &self.counters
    }
}
