// Admission control tests
// Author: kelexine (https://github.com/kelexine)

use genvault::config::{DeploymentMode, RateLimitConfig};
use genvault::ratelimit::{Admission, DenyReason, QuotaKind, RateLimiter, ResourceClaim};
use std::time::Duration;

fn limiter(capacity: u32, refill_per_second: f64) -> RateLimiter {
    RateLimiter::new(&RateLimitConfig {
        capacity,
        refill_per_second,
        ..Default::default()
    })
}

fn denial(admission: Admission) -> genvault::ratelimit::Denial {
    match admission {
        Admission::Denied(denial) => denial,
        Admission::Admitted(_) => panic!("expected a denial"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_exactly_one_per_refill() {
    let limiter = limiter(5, 2.0);

    for _ in 0..5 {
        assert!(limiter.admit("alice", 1).is_admitted());
    }
    let denied = denial(limiter.admit("alice", 1));
    assert_eq!(denied.reason, DenyReason::RateLimited);
    assert_eq!(denied.retry_after_ms, 500);

    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(limiter.admit("alice", 1).is_admitted());
    assert!(!limiter.admit("alice", 1).is_admitted());
}

#[tokio::test(start_paused = true)]
async fn test_bucket_never_exceeds_capacity() {
    let limiter = limiter(3, 10.0);
    assert!(limiter.admit("alice", 1).is_admitted());

    tokio::time::advance(Duration::from_secs(60)).await;
    let snapshot = limiter.snapshot("alice").unwrap();
    assert!((snapshot.tokens - 3.0).abs() < 1e-9);

    for _ in 0..3 {
        assert!(limiter.admit("alice", 1).is_admitted());
    }
    assert!(!limiter.admit("alice", 1).is_admitted());
}

#[tokio::test(start_paused = true)]
async fn test_owners_have_independent_buckets() {
    let limiter = limiter(2, 1.0);
    assert!(limiter.admit("alice", 2).is_admitted());
    assert!(!limiter.admit("alice", 1).is_admitted());

    assert!(limiter.admit("bob", 2).is_admitted());
    assert_eq!(limiter.tracked_owners(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cost_above_capacity_is_never_admitted() {
    let limiter = limiter(4, 1.0);
    let denied = denial(limiter.admit("alice", 5));
    assert_eq!(denied.reason, DenyReason::CostExceedsCapacity);
    assert!(!denied.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_quota_released_on_drop() {
    let mut config = RateLimitConfig {
        capacity: 100,
        refill_per_second: 100.0,
        ..Default::default()
    };
    config.single.max_in_flight_per_owner = 2;
    let limiter = RateLimiter::new(&config);

    let first = limiter.admit("alice", 1);
    let second = limiter.admit("alice", 1);
    assert!(first.is_admitted() && second.is_admitted());

    let denied = denial(limiter.admit("alice", 1));
    assert_eq!(denied.reason, DenyReason::OwnerQuota(QuotaKind::InFlight));
    assert_eq!(denied.retry_after_ms, config.quota_retry_after_ms);
    assert!(denied.reason.is_quota());

    drop(first);
    assert!(limiter.admit("alice", 1).is_admitted());
}

#[tokio::test(start_paused = true)]
async fn test_deployment_ceiling_spans_owners() {
    let mut config = RateLimitConfig {
        capacity: 100,
        refill_per_second: 100.0,
        mode: DeploymentMode::Shared,
        ..Default::default()
    };
    config.shared.max_memory_bytes_total = 10_000;
    let limiter = RateLimiter::new(&config);

    let claim = ResourceClaim {
        tokens: 1,
        memory_bytes: 6_000,
        cpu_units: 1,
    };
    let _held = limiter.admit_claim("alice", claim);
    assert!(_held.is_admitted());

    let denied = denial(limiter.admit_claim("bob", claim));
    assert_eq!(denied.reason, DenyReason::DeploymentQuota(QuotaKind::Memory));
    assert_eq!(limiter.deployment_usage().memory_bytes, 6_000);
}

#[tokio::test(start_paused = true)]
async fn test_prune_forgets_idle_owners() {
    let limiter = limiter(2, 1.0);
    drop(limiter.admit("alice", 2));
    assert_eq!(limiter.prune_idle(), 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(limiter.prune_idle(), 1);
    assert_eq!(limiter.tracked_owners(), 0);
}
