//! Cache entry, lookup and statistics models.

// Author: kelexine (https://github.com/kelexine)

use crate::integrity::SealedEntry;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One storage level of the cache, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Fast,
    Similarity,
    Persistent,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Fast => "fast",
            TierKind::Similarity => "similarity",
            TierKind::Persistent => "persistent",
        }
    }
}

/// Slowest tier a stored result is written to.
///
/// `Fast` writes only the in-memory exact tier, `Similarity` adds the
/// near-duplicate index, `Persistent` writes all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierHint {
    Fast,
    Similarity,
    #[default]
    Persistent,
}

impl TierHint {
    /// Whether a store with this hint reaches `tier`.
    pub fn includes(&self, tier: TierKind) -> bool {
        let slowest = match self {
            TierHint::Fast => TierKind::Fast,
            TierHint::Similarity => TierKind::Similarity,
            TierHint::Persistent => TierKind::Persistent,
        };
        tier <= slowest
    }
}

/// A sealed payload as held by one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Fingerprint the entry was stored under.
    pub key: String,
    /// Normalized request text, compared by the similarity tier.
    pub canonical: String,
    pub sealed: SealedEntry,
    pub tier: TierKind,
    pub hit_count: u64,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, canonical: impl Into<String>, sealed: SealedEntry, tier: TierKind) -> Self {
        Self {
            key: key.into(),
            canonical: canonical.into(),
            sealed,
            tier,
            hit_count: 0,
            last_access: Utc::now(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.sealed.owner_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.sealed.created_at
    }

    pub fn is_encrypted(&self) -> bool {
        self.sealed.is_encrypted()
    }

    /// Copy of this entry retargeted to another tier.
    pub fn for_tier(&self, tier: TierKind) -> Self {
        Self {
            tier,
            ..self.clone()
        }
    }
}

/// Result of [`MultiTierCache::lookup`](super::MultiTierCache::lookup).
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit { payload: Bytes, tier: TierKind },
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Lookup::Hit { payload, .. } => Some(payload),
            Lookup::Miss => None,
        }
    }
}

/// Why a store was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Persistent disk quota exhausted.
    Capacity,
    /// The sealed entry does not belong to the storing owner.
    OwnerMismatch,
    /// The sealed entry was made for a different key.
    KeyMismatch,
    /// Malformed owner id or key.
    Invalid,
    /// Sealing or the on-disk write failed.
    Sealing,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Capacity => "capacity",
            RejectReason::OwnerMismatch => "owner_mismatch",
            RejectReason::KeyMismatch => "key_mismatch",
            RejectReason::Invalid => "invalid",
            RejectReason::Sealing => "sealing",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Ack,
    Rejected(RejectReason),
}

impl StoreOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, StoreOutcome::Ack)
    }
}

/// Live counters of one tier.
#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    integrity_failures: AtomicU64,
}

impl TierCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Counters of one tier at a point in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub integrity_failures: u64,
    pub entries: usize,
}

/// Statistics for all tiers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fast: TierStats,
    pub similarity: TierStats,
    pub persistent: TierStats,
}

impl CacheStats {
    pub fn total_hits(&self) -> u64 {
        self.fast.hits + self.similarity.hits + self.persistent.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_hint_reach() {
        assert!(TierHint::Fast.includes(TierKind::Fast));
        assert!(!TierHint::Fast.includes(TierKind::Similarity));
        assert!(TierHint::Similarity.includes(TierKind::Similarity));
        assert!(!TierHint::Similarity.includes(TierKind::Persistent));
        assert!(TierHint::Persistent.includes(TierKind::Persistent));
    }

    #[test]
    fn test_tier_hint_serde() {
        let hint: TierHint = serde_json::from_str("\"similarity\"").unwrap();
        assert_eq!(hint, TierHint::Similarity);
        assert_eq!(TierHint::default(), TierHint::Persistent);
    }
}
