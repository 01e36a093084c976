//! Admission control: per-owner token buckets plus resource quotas.
//!
//! `admit` lazily refills the caller's bucket, checks the in-flight, memory
//! and CPU ceilings for the owner and for the whole deployment, and only then
//! takes tokens. All of that happens under the owner's map-shard lock, so
//! concurrent admits for one owner cannot lose an update.
//!
//! An admitted request holds an [`AdmissionGuard`]; dropping it releases the
//! reserved resources. The two halves are also available on their own:
//! [`RateLimiter::take_tokens`] charges the bucket only, and
//! [`RateLimiter::reserve`] only reserves resources, so a caller can pay for
//! a request up front and hold quota just while the expensive part runs.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod bucket;
mod quota;

pub use bucket::TokenBucket;
pub use quota::{QuotaKind, ResourceClaim, Usage};

use crate::config::{QuotaProfile, RateLimitConfig};
use dashmap::DashMap;
use parking_lot::Mutex;
use quota::Ceilings;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Not enough tokens yet.
    RateLimited,
    /// A per-owner resource ceiling would be exceeded.
    OwnerQuota(QuotaKind),
    /// A deployment-wide resource ceiling would be exceeded.
    DeploymentQuota(QuotaKind),
    /// The cost can never fit in the bucket.
    CostExceedsCapacity,
}

impl DenyReason {
    pub fn is_quota(&self) -> bool {
        matches!(self, DenyReason::OwnerQuota(_) | DenyReason::DeploymentQuota(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimited => "rate_limited",
            DenyReason::OwnerQuota(_) | DenyReason::DeploymentQuota(_) => "quota_exceeded",
            DenyReason::CostExceedsCapacity => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    /// Minimum wait before the same request could be admitted.
    pub retry_after_ms: u64,
}

impl Denial {
    /// Whether waiting can ever help.
    pub fn is_retryable(&self) -> bool {
        self.reason != DenyReason::CostExceedsCapacity
    }
}

/// Result of [`RateLimiter::admit`].
#[derive(Debug)]
pub enum Admission {
    Admitted(AdmissionGuard),
    Denied(Denial),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Point-in-time view of one owner's state.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSnapshot {
    pub tokens: f64,
    pub capacity: f64,
    pub usage: Usage,
}

/// What one `acquire` call charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charge {
    Tokens,
    Resources,
    Both,
}

struct OwnerState {
    bucket: TokenBucket,
    usage: Usage,
}

struct LimiterInner {
    capacity: u32,
    refill_rate: f64,
    quota_retry_after_ms: u64,
    owner_ceilings: Ceilings,
    deployment_ceilings: Ceilings,
    profile: QuotaProfile,
    owners: DashMap<String, OwnerState>,
    deployment: Mutex<Usage>,
}

/// Shared admission controller. Cloning shares state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let profile = config.profile().clone();
        Self {
            inner: Arc::new(LimiterInner {
                capacity: config.capacity,
                refill_rate: config.refill_per_second,
                quota_retry_after_ms: config.quota_retry_after_ms,
                owner_ceilings: Ceilings::per_owner(&profile),
                deployment_ceilings: Ceilings::deployment(&profile),
                profile,
                owners: DashMap::new(),
                deployment: Mutex::new(Usage::default()),
            }),
        }
    }

    /// Admit a request that costs `cost` tokens.
    pub fn admit(&self, owner_id: &str, cost: u32) -> Admission {
        self.admit_claim(owner_id, ResourceClaim::tokens(cost))
    }

    /// Admit a request with an explicit resource claim: take its tokens and
    /// reserve its resources in one step.
    pub fn admit_claim(&self, owner_id: &str, claim: ResourceClaim) -> Admission {
        match self.acquire(owner_id, &claim, Charge::Both) {
            Ok(()) => {
                crate::metrics::record_admission("admitted");
                Admission::Admitted(self.guard(owner_id, claim))
            }
            Err(denial) => Admission::Denied(denial),
        }
    }

    /// Take `cost` tokens from the owner's bucket without reserving any
    /// resources.
    pub fn take_tokens(&self, owner_id: &str, cost: u32) -> Result<(), Denial> {
        self.acquire(owner_id, &ResourceClaim::tokens(cost), Charge::Tokens)
            .map(|()| crate::metrics::record_admission("admitted"))
    }

    /// Reserve the resources of `claim` against the owner and deployment
    /// ceilings. Tokens are not touched.
    pub fn reserve(&self, owner_id: &str, claim: ResourceClaim) -> Result<AdmissionGuard, Denial> {
        self.acquire(owner_id, &claim, Charge::Resources)?;
        Ok(self.guard(owner_id, claim))
    }

    fn acquire(&self, owner_id: &str, claim: &ResourceClaim, charge: Charge) -> Result<(), Denial> {
        let inner = &self.inner;
        let take_tokens = charge != Charge::Resources;
        let reserve = charge != Charge::Tokens;
        if take_tokens && claim.tokens > inner.capacity {
            return Err(self.deny(owner_id, DenyReason::CostExceedsCapacity, 0));
        }

        let now = Instant::now();
        let mut owner = inner
            .owners
            .entry(owner_id.to_string())
            .or_insert_with(|| OwnerState {
                bucket: TokenBucket::new(inner.capacity, inner.refill_rate, now),
                usage: Usage::default(),
            });
        owner.bucket.refill(now);

        if reserve {
            if let Some(kind) = owner.usage.check(claim, &inner.owner_ceilings) {
                drop(owner);
                return Err(self.deny(owner_id, DenyReason::OwnerQuota(kind), inner.quota_retry_after_ms));
            }
        }

        let mut deployment = inner.deployment.lock();
        if reserve {
            if let Some(kind) = deployment.check(claim, &inner.deployment_ceilings) {
                drop(deployment);
                drop(owner);
                return Err(self.deny(
                    owner_id,
                    DenyReason::DeploymentQuota(kind),
                    inner.quota_retry_after_ms,
                ));
            }
        }

        if take_tokens {
            if let Err(wait) = owner.bucket.try_take(claim.tokens, now) {
                drop(deployment);
                drop(owner);
                return Err(self.deny(owner_id, DenyReason::RateLimited, wait.as_millis() as u64));
            }
        }

        if reserve {
            owner.usage.reserve(claim);
            deployment.reserve(claim);
        }
        Ok(())
    }

    fn guard(&self, owner_id: &str, claim: ResourceClaim) -> AdmissionGuard {
        crate::metrics::adjust_in_flight("admitted", 1.0);
        AdmissionGuard {
            limiter: Arc::clone(&self.inner),
            owner_id: owner_id.to_string(),
            claim,
        }
    }

    fn deny(&self, owner_id: &str, reason: DenyReason, retry_after_ms: u64) -> Denial {
        debug!(
            "Denied request for owner digest {} ({:?}, retry after {}ms)",
            &crate::audit::digest(owner_id.as_bytes())[..12],
            reason,
            retry_after_ms
        );
        crate::metrics::record_admission(reason.as_str());
        Denial {
            reason,
            retry_after_ms,
        }
    }

    pub fn snapshot(&self, owner_id: &str) -> Option<OwnerSnapshot> {
        let now = Instant::now();
        self.inner.owners.get_mut(owner_id).map(|mut owner| {
            owner.bucket.refill(now);
            OwnerSnapshot {
                tokens: owner.bucket.tokens(),
                capacity: owner.bucket.capacity(),
                usage: owner.usage,
            }
        })
    }

    pub fn deployment_usage(&self) -> Usage {
        *self.inner.deployment.lock()
    }

    /// Per-owner in-flight ceiling of the active quota profile.
    pub fn max_in_flight_per_owner(&self) -> usize {
        self.inner.profile.max_in_flight_per_owner as usize
    }

    /// Forget owners whose bucket is full and who hold no reservations.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.owners.len();
        self.inner.owners.retain(|_, owner| {
            owner.bucket.refill(now);
            !(owner.bucket.is_full() && owner.usage.is_idle())
        });
        before - self.inner.owners.len()
    }

    pub fn tracked_owners(&self) -> usize {
        self.inner.owners.len()
    }
}

/// Reservation held by an admitted request. Released on drop.
#[derive(Debug)]
pub struct AdmissionGuard {
    limiter: Arc<LimiterInner>,
    owner_id: String,
    claim: ResourceClaim,
}

impl AdmissionGuard {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn claim(&self) -> &ResourceClaim {
        &self.claim
    }
}

impl std::fmt::Debug for LimiterInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterInner")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("owners", &self.owners.len())
            .finish()
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(mut owner) = self.limiter.owners.get_mut(&self.owner_id) {
            owner.usage.release(&self.claim);
        }
        self.limiter.deployment.lock().release(&self.claim);
        crate::metrics::adjust_in_flight("admitted", -1.0);
    }
}
