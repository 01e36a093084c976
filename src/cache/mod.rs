//! Multi-tier request/response cache.
//!
//! Lookups check the fast exact-match tier, then the per-owner similarity
//! index, then the encrypted on-disk tier. Every entry is sealed by
//! [`crate::integrity::Sealer`] and verified against the caller's owner id
//! before a hit is honored.

// Author: kelexine (https://github.com/kelexine)

pub mod bounded;
pub mod fast;
pub mod key;
pub mod manager;
pub mod models;
pub mod persistent;
pub mod similarity;
pub mod tier;

pub use bounded::BoundedCache;
pub use key::{is_fingerprint, CacheKey};
pub use manager::MultiTierCache;
pub use models::{
    CacheEntry, CacheStats, Lookup, RejectReason, StoreOutcome, TierHint, TierKind, TierStats,
};
pub use persistent::PersistentTier;
pub use similarity::{NormalizedLevenshtein, SimilarityMatcher};
pub use tier::{CacheTier, TierLookup};
