// Shared contract of exact, approximate and on-disk tiers
// Author: kelexine (https://github.com/kelexine)

use super::key::CacheKey;
use super::models::{CacheEntry, RejectReason, TierCounters, TierKind, TierStats};
use async_trait::async_trait;

/// What a single tier found for a key.
///
/// `Corrupt` means the tier held something for the key that could not be
/// decoded; the tier has already dropped it. A `Found` entry's `key` is the
/// slot it was filed under; its seal is checked by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TierLookup {
    Found(CacheEntry),
    NotFound,
    Corrupt(String),
}

/// Check that `entry` may be filed under `key` for `owner_id`.
///
/// The sealed key, the entry's slot and the owner all have to agree; tiers
/// call this before accepting a write.
pub fn check_binding(key: &CacheKey, owner_id: &str, entry: &CacheEntry) -> Result<(), RejectReason> {
    if entry.owner_id() != owner_id {
        return Err(RejectReason::OwnerMismatch);
    }
    if entry.sealed.key != key.fingerprint() || entry.key != key.fingerprint() {
        return Err(RejectReason::KeyMismatch);
    }
    Ok(())
}

#[async_trait]
pub trait CacheTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Entry for `key` owned by `owner_id`, if any. Tiers never return an
    /// entry filed under another owner.
    async fn get(&self, key: &CacheKey, owner_id: &str) -> TierLookup;

    /// File `entry` under `key` for `owner_id`. Refused with `OwnerMismatch`
    /// or `KeyMismatch` when the sealed entry was made for someone or
    /// something else.
    async fn put(&self, key: &CacheKey, owner_id: &str, entry: CacheEntry) -> Result<(), RejectReason>;

    /// Remove the entry filed under exactly this fingerprint. Returns whether one existed.
    async fn remove(&self, fingerprint: &str, owner_id: &str) -> bool;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> usize;

    async fn clear(&self);

    fn len(&self) -> usize;

    fn counters(&self) -> &TierCounters;

    fn stats(&self) -> TierStats {
        self.counters().snapshot(self.len())
    }
}
