// Cache manager - tiered lookup, promotion and sealed stores
// Author: kelexine (https://github.com/kelexine)

use crate::audit::{AuditEventType, AuditLog, AuditRecord};
use crate::cache::fast::FastTier;
use crate::cache::key::CacheKey;
use crate::cache::models::{CacheEntry, CacheStats, Lookup, RejectReason, StoreOutcome, TierHint, TierKind};
use crate::cache::persistent::PersistentTier;
use crate::cache::similarity::{SimilarityMatcher, SimilarityTier};
use crate::cache::tier::{CacheTier, TierLookup};
use crate::config::CacheSettings;
use crate::error::Result;
use crate::integrity::Sealer;
use crate::models::{validate_owner_id, Caller};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of probing one tier, after integrity checks.
enum TierRead {
    Hit(Bytes, CacheEntry),
    NotFound,
    /// Present but failed verification; already evicted.
    Untrusted,
}

/// Request/response cache over the fast, similarity and persistent tiers.
pub struct MultiTierCache {
    fast: Arc<FastTier>,
    similarity: Option<Arc<SimilarityTier>>,
    persistent: Option<Arc<PersistentTier>>,
    sealer: Arc<Sealer>,
    audit: Arc<AuditLog>,
    fast_ttl: Duration,
    similarity_ttl: Duration,
    sweep_interval: Duration,
}

impl MultiTierCache {
    /// Build all enabled tiers. Opens the persistent directory if configured.
    pub async fn new(settings: &CacheSettings, sealer: Arc<Sealer>, audit: Arc<AuditLog>) -> Result<Self> {
        let similarity = settings
            .similarity
            .enabled
            .then(|| Arc::new(SimilarityTier::new(&settings.similarity)));
        Self::build(settings, similarity, sealer, audit).await
    }

    /// Same as [`new`](Self::new) with a custom similarity matcher.
    pub async fn with_matcher(
        settings: &CacheSettings,
        matcher: Arc<dyn SimilarityMatcher>,
        sealer: Arc<Sealer>,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let similarity = settings
            .similarity
            .enabled
            .then(|| Arc::new(SimilarityTier::with_matcher(&settings.similarity, matcher)));
        Self::build(settings, similarity, sealer, audit).await
    }

    async fn build(
        settings: &CacheSettings,
        similarity: Option<Arc<SimilarityTier>>,
        sealer: Arc<Sealer>,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let persistent = if settings.persistent.enabled {
            Some(Arc::new(PersistentTier::open(&settings.persistent).await?))
        } else {
            None
        };

        Ok(Self {
            fast: Arc::new(FastTier::new(&settings.fast)),
            similarity,
            persistent,
            sealer,
            audit,
            fast_ttl: settings.fast.ttl(),
            similarity_ttl: settings.similarity.ttl(),
            sweep_interval: Duration::from_secs(settings.persistent.sweep_interval_seconds.max(1)),
        })
    }

    fn tiers(&self) -> Vec<Arc<dyn CacheTier>> {
        let mut tiers: Vec<Arc<dyn CacheTier>> = Vec::with_capacity(3);
        tiers.push(self.fast.clone());
        if let Some(similarity) = &self.similarity {
            tiers.push(similarity.clone());
        }
        if let Some(persistent) = &self.persistent {
            tiers.push(persistent.clone());
        }
        tiers
    }

    /// Check tiers fastest first and return the first verified hit.
    ///
    /// Entries that fail verification are evicted and audited, then the search
    /// continues as if they were absent. Hits from slower tiers are copied
    /// into the faster ones under the queried key.
    pub async fn lookup(&self, key: &CacheKey, caller: &Caller) -> Lookup {
        let owner_id = caller.owner_id.as_str();
        if validate_owner_id(owner_id).is_err() {
            self.audit_event(caller, AuditEventType::CacheMiss, key);
            return Lookup::Miss;
        }

        for tier in self.tiers() {
            let kind = tier.kind();
            match self.read_tier(tier.as_ref(), key, caller).await {
                TierRead::Hit(payload, entry) => {
                    tier.counters().hit();
                    crate::metrics::record_cache_op(kind.as_str(), "hit");
                    debug!("Cache hit for {} in {} tier (hits: {})", key, kind.as_str(), entry.hit_count);
                    self.promote(key, &payload, owner_id, kind).await;
                    self.audit_event(caller, AuditEventType::CacheHit, key);
                    return Lookup::Hit { payload, tier: kind };
                }
                TierRead::NotFound | TierRead::Untrusted => {
                    tier.counters().miss();
                    crate::metrics::record_cache_op(kind.as_str(), "miss");
                }
            }
        }

        debug!("Cache miss for {}", key);
        self.audit_event(caller, AuditEventType::CacheMiss, key);
        Lookup::Miss
    }

    async fn read_tier(&self, tier: &dyn CacheTier, key: &CacheKey, caller: &Caller) -> TierRead {
        let entry = match tier.get(key, &caller.owner_id).await {
            TierLookup::Found(entry) => entry,
            TierLookup::NotFound => return TierRead::NotFound,
            TierLookup::Corrupt(reason) => {
                warn!("Dropped corrupt {} entry for {}: {}", tier.kind().as_str(), key, reason);
                self.integrity_failure(tier, caller, key);
                return TierRead::Untrusted;
            }
        };

        let verified = check_slot(tier.kind(), key, &entry).and_then(|()| {
            self.sealer
                .open(&entry.sealed, &caller.owner_id)
                .map_err(|failure| failure.to_string())
        });
        match verified {
            Ok(payload) => TierRead::Hit(payload, entry),
            Err(failure) => {
                warn!(
                    "Integrity failure in {} tier for {}: {}",
                    tier.kind().as_str(),
                    key,
                    failure
                );
                tier.remove(&entry.key, &caller.owner_id).await;
                self.integrity_failure(tier, caller, key);
                TierRead::Untrusted
            }
        }
    }

    fn integrity_failure(&self, tier: &dyn CacheTier, caller: &Caller, key: &CacheKey) {
        tier.counters().integrity_failure();
        tier.counters().evicted(1);
        crate::metrics::record_cache_op(tier.kind().as_str(), "integrity_failure");
        self.audit_event(caller, AuditEventType::IntegrityFailure, key);
    }

    async fn promote(&self, key: &CacheKey, payload: &Bytes, owner_id: &str, found_in: TierKind) {
        if found_in == TierKind::Fast {
            return;
        }
        // tags bind the key, so promoted copies are resealed under the queried key
        let sealed = self.sealer.seal(key.fingerprint(), payload, owner_id);
        let entry = CacheEntry::new(key.fingerprint(), key.canonical(), sealed, TierKind::Fast);

        if found_in == TierKind::Persistent {
            if let Some(similarity) = &self.similarity {
                let sealed = entry.sealed.clone().with_ttl(self.similarity_ttl);
                let _ = similarity
                    .put(key, owner_id, CacheEntry { sealed, ..entry.for_tier(TierKind::Similarity) })
                    .await;
            }
        }
        let sealed = entry.sealed.clone().with_ttl(self.fast_ttl);
        let _ = self.fast.put(key, owner_id, CacheEntry { sealed, ..entry }).await;
        crate::metrics::record_cache_op(found_in.as_str(), "promote");
    }

    /// Seal `payload` and write it to every tier up to `hint`.
    ///
    /// The persistent tier is written first; if it refuses, nothing is
    /// written anywhere and the outcome is `Rejected`.
    pub async fn store(&self, key: &CacheKey, payload: Bytes, caller: &Caller, hint: TierHint) -> StoreOutcome {
        let owner_id = caller.owner_id.as_str();
        if validate_owner_id(owner_id).is_err() {
            return self.reject(caller, key, RejectReason::Invalid);
        }

        let sealed = self.sealer.seal(key.fingerprint(), &payload, owner_id);
        let entry = CacheEntry::new(key.fingerprint(), key.canonical(), sealed, TierKind::Fast);

        if hint.includes(TierKind::Persistent) {
            if let Some(persistent) = &self.persistent {
                let encrypted = match self.sealer.seal_encrypted(key.fingerprint(), &payload, owner_id) {
                    Ok(sealed) => sealed.with_ttl(persistent.ttl()),
                    Err(e) => {
                        warn!("Failed to encrypt entry {}: {}", key, e);
                        return self.reject(caller, key, RejectReason::Sealing);
                    }
                };
                let persistent_entry = CacheEntry::new(
                    key.fingerprint(),
                    key.canonical(),
                    encrypted,
                    TierKind::Persistent,
                );
                if let Err(reason) = persistent.put(key, owner_id, persistent_entry).await {
                    return self.reject(caller, key, reason);
                }
                crate::metrics::record_cache_op(TierKind::Persistent.as_str(), "store");
            }
        }

        if hint.includes(TierKind::Similarity) {
            if let Some(similarity) = &self.similarity {
                let sealed = entry.sealed.clone().with_ttl(self.similarity_ttl);
                let stored = similarity
                    .put(key, owner_id, CacheEntry { sealed, ..entry.for_tier(TierKind::Similarity) })
                    .await;
                if let Err(reason) = stored {
                    warn!("Similarity tier refused {}: {}", key, reason);
                } else {
                    crate::metrics::record_cache_op(TierKind::Similarity.as_str(), "store");
                }
            }
        }

        let sealed = entry.sealed.clone().with_ttl(self.fast_ttl);
        if let Err(reason) = self.fast.put(key, owner_id, CacheEntry { sealed, ..entry }).await {
            warn!("Fast tier refused {}: {}", key, reason);
        } else {
            crate::metrics::record_cache_op(TierKind::Fast.as_str(), "store");
        }
        self.update_gauges();

        self.audit_event(caller, AuditEventType::CacheStore, key);
        StoreOutcome::Ack
    }

    fn reject(&self, caller: &Caller, key: &CacheKey, reason: RejectReason) -> StoreOutcome {
        debug!("Store of {} rejected: {}", key, reason);
        crate::metrics::record_cache_op("store", reason.as_str());
        self.audit_event(caller, AuditEventType::StoreRejected, key);
        StoreOutcome::Rejected(reason)
    }

    /// Remove `key` for `owner_id` from every tier. Returns whether any tier held it.
    pub async fn invalidate(&self, key: &CacheKey, owner_id: &str) -> bool {
        let mut removed = false;
        for tier in self.tiers() {
            removed |= tier.remove(key.fingerprint(), owner_id).await;
        }
        self.update_gauges();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fast: self.fast.stats(),
            similarity: self.similarity.as_ref().map(|t| t.stats()).unwrap_or_default(),
            persistent: self.persistent.as_ref().map(|t| t.stats()).unwrap_or_default(),
        }
    }

    /// Empty the in-memory tiers. Persistent entries are left to expire.
    pub async fn clear(&self) {
        self.fast.clear().await;
        if let Some(similarity) = &self.similarity {
            similarity.clear().await;
        }
        self.update_gauges();
    }

    /// Drop expired entries from every tier.
    pub async fn purge_expired(&self) -> usize {
        let mut purged = 0;
        for tier in self.tiers() {
            purged += tier.purge_expired().await;
        }
        self.update_gauges();
        purged
    }

    /// Periodic expiry sweep over all tiers. Stops once the cache is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    debug!("Cache maintenance purged {} entries", purged);
                }
            }
        })
    }

    pub fn persistent(&self) -> Option<&Arc<PersistentTier>> {
        self.persistent.as_ref()
    }

    fn update_gauges(&self) {
        for tier in self.tiers() {
            crate::metrics::update_cache_entries(tier.kind().as_str(), tier.len());
        }
    }

    fn audit_event(&self, caller: &Caller, event_type: AuditEventType, key: &CacheKey) {
        self.audit.record(AuditRecord::new(
            caller.correlation_id.clone(),
            event_type,
            key.fingerprint().as_bytes(),
        ));
    }
}

/// Whether `entry`, found in a `tier` slot while looking up `key`, was sealed
/// for that slot.
///
/// Exact tiers must return the entry sealed for the queried key. The
/// similarity tier may answer with a neighbour, but only one whose seal,
/// slot and canonical text all name the same key.
fn check_slot(tier: TierKind, key: &CacheKey, entry: &CacheEntry) -> std::result::Result<(), String> {
    if entry.sealed.key != entry.key {
        return Err(format!(
            "sealed for {} but filed under {}",
            crate::integrity::short(&entry.sealed.key),
            crate::integrity::short(&entry.key)
        ));
    }
    if tier != TierKind::Similarity && entry.key != key.fingerprint() {
        return Err(format!(
            "sealed for {} but served for {}",
            crate::integrity::short(&entry.sealed.key),
            key
        ));
    }
    if CacheKey::from_canonical(entry.canonical.as_str()).fingerprint() != entry.sealed.key {
        return Err("canonical text does not match the sealed key".to_string());
    }
    Ok(())
}
