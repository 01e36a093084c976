//! Concurrent batch orchestrator.
//!
//! Every item of a batch runs in its own task and passes, in order:
//! rate-limiter tokens, a per-key single-flight lock, cache lookup, and on a
//! miss template rendering, a concurrency slot, a resource reservation
//! (in-flight, memory, CPU), the generation pipeline under a deadline, and a
//! sealed cache store.
//!
//! The batch's slot count never exceeds the owner's in-flight quota, so
//! items beyond it queue on the semaphore in arrival order instead of
//! bouncing off the quota. Cache hits take neither a slot nor a
//! reservation. A failing or panicking item only fills its own result slot.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod cancel;
mod models;

pub use cancel::CancelToken;
pub use models::{BatchJob, BatchResults, BatchSummary, ItemFailure, ItemResult};

use crate::audit::{AuditEventType, AuditLog, AuditRecord};
use crate::cache::{Lookup, MultiTierCache, StoreOutcome};
use crate::config::OrchestratorConfig;
use crate::error::GenerationFailure;
use crate::models::{validate_owner_id, Caller, GenerationRequest};
use crate::pipeline::{GenerationPipeline, PipelineInput};
use crate::ratelimit::{AdmissionGuard, Denial, DenyReason, RateLimiter};
use crate::templates::TemplateCache;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

type FlightKey = (String, String);

struct OrchestratorInner {
    cache: Arc<MultiTierCache>,
    limiter: RateLimiter,
    templates: Arc<TemplateCache>,
    pipeline: Arc<dyn GenerationPipeline>,
    audit: Arc<AuditLog>,
    config: OrchestratorConfig,
    flights: DashMap<FlightKey, Arc<Mutex<()>>>,
}

/// Runs batches against the cache and the generation pipeline. Cloning shares state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        cache: Arc<MultiTierCache>,
        limiter: RateLimiter,
        templates: Arc<TemplateCache>,
        pipeline: Arc<dyn GenerationPipeline>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                cache,
                limiter,
                templates,
                pipeline,
                audit,
                config,
                flights: DashMap::new(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<MultiTierCache> {
        &self.inner.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn templates(&self) -> &Arc<TemplateCache> {
        &self.inner.templates
    }

    /// Effective concurrency for a batch: the requested limit (or the
    /// configured default), never above the owner's in-flight quota.
    pub fn effective_concurrency(&self, requested: Option<usize>) -> usize {
        let requested = requested.unwrap_or(self.inner.config.default_concurrency).max(1);
        requested.min(self.inner.limiter.max_in_flight_per_owner().max(1))
    }

    /// Run every item of `job` for `owner_id`. `results[i]` always belongs
    /// to `job.items[i]`.
    pub async fn run(&self, job: BatchJob, owner_id: &str, cancel: CancelToken) -> BatchResults {
        let batch_id = Uuid::new_v4();
        let total = job.items.len();

        if let Err(e) = validate_owner_id(owner_id) {
            let failure = ItemFailure::from(e);
            return BatchResults::from_results(vec![ItemResult::failed(failure); total]);
        }

        let limit = self.effective_concurrency(job.concurrency_limit);
        let slots = Arc::new(Semaphore::new(limit));
        info!("Batch {} started: {} items, concurrency {}", batch_id, total, limit);

        let handles: Vec<_> = job
            .items
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let orchestrator = self.clone();
                let caller = Caller::with_correlation(owner_id, format!("{}/{}", batch_id, index));
                let slots = Arc::clone(&slots);
                let cancel = cancel.clone();
                tokio::spawn(async move { orchestrator.process_item(request, caller, slots, cancel).await })
            })
            .collect();

        let results: Vec<ItemResult> = join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    warn!("Batch {} item {} aborted: {}", batch_id, index, e);
                    ItemResult::failed(ItemFailure::Internal(format!("item task failed: {}", e)))
                });
                crate::metrics::record_batch_item(result.outcome());
                result
            })
            .collect();

        let results = BatchResults::from_results(results);
        info!(
            "Batch {} finished: {} succeeded ({} cached), {} failed",
            batch_id, results.summary.succeeded, results.summary.cached, results.summary.failed
        );
        results
    }

    /// Run a single request through the batch path.
    pub async fn submit(&self, request: GenerationRequest, owner_id: &str) -> ItemResult {
        self.run(BatchJob::single(request), owner_id, CancelToken::new())
            .await
            .results
            .into_iter()
            .next()
            .unwrap_or_else(|| ItemResult::failed(ItemFailure::Internal("empty batch result".to_string())))
    }

    async fn process_item(
        &self,
        request: GenerationRequest,
        caller: Caller,
        slots: Arc<Semaphore>,
        cancel: CancelToken,
    ) -> ItemResult {
        match self.execute(&request, &caller, &slots, &cancel).await {
            Ok(result) => result,
            Err(failure) => {
                debug!("Item {} failed: {}", caller.correlation_id, failure);
                ItemResult::failed(failure)
            }
        }
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        caller: &Caller,
        slots: &Semaphore,
        cancel: &CancelToken,
    ) -> Result<ItemResult, ItemFailure> {
        if cancel.is_cancelled() {
            return Err(ItemFailure::Cancelled);
        }
        request.validate()?;

        self.admit(request, caller, cancel).await?;

        let key = request.cache_key();
        let flight_key = (caller.owner_id.clone(), key.fingerprint().to_string());
        let flight = self
            .inner
            .flights
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _flight = flight.lock().await;
            self.lookup_or_generate(request, caller, &key, slots, cancel).await
        };

        drop(flight);
        self.inner
            .flights
            .remove_if(&flight_key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn lookup_or_generate(
        &self,
        request: &GenerationRequest,
        caller: &Caller,
        key: &crate::cache::CacheKey,
        slots: &Semaphore,
        cancel: &CancelToken,
    ) -> Result<ItemResult, ItemFailure> {
        if let Lookup::Hit { payload, tier } = self.inner.cache.lookup(key, caller).await {
            return Ok(ItemResult::cached(payload, tier));
        }

        let prompt = self.inner.templates.render(&request.template_id, &request.params)?;

        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ItemFailure::Cancelled),
            permit = slots.acquire() => permit.map_err(|_| ItemFailure::Cancelled)?,
        };
        let _reservation = self.reserve(request, caller, cancel).await?;
        crate::metrics::adjust_in_flight("generation", 1.0);

        let deadline = Duration::from_millis(
            request
                .deadline_ms
                .unwrap_or(self.inner.config.generation_timeout_ms)
                .max(1),
        );
        let input = PipelineInput {
            template_id: request.template_id.clone(),
            prompt,
            deadline,
        };

        let started = Instant::now();
        let generated = tokio::time::timeout(deadline, self.inner.pipeline.generate(input)).await;
        let elapsed = started.elapsed().as_secs_f64();
        crate::metrics::adjust_in_flight("generation", -1.0);

        let payload = match generated {
            Ok(Ok(payload)) => {
                crate::metrics::record_generation("success", elapsed);
                payload
            }
            Ok(Err(failure)) => {
                crate::metrics::record_generation("failure", elapsed);
                return Err(ItemFailure::Generation(failure));
            }
            Err(_) => {
                crate::metrics::record_generation("timeout", elapsed);
                return Err(ItemFailure::Generation(GenerationFailure::Timeout(
                    deadline.as_millis() as u64,
                )));
            }
        };

        let hint = request.tier_hint.unwrap_or_default();
        if let StoreOutcome::Rejected(reason) = self.inner.cache.store(key, payload.clone(), caller, hint).await {
            debug!("Result for {} not cached: {}", key, reason);
        }
        Ok(ItemResult::generated(payload))
    }

    /// Charge the item's tokens, waiting out rate-limit denials while the
    /// suggested delay still fits in the admission budget.
    async fn admit(
        &self,
        request: &GenerationRequest,
        caller: &Caller,
        cancel: &CancelToken,
    ) -> Result<(), ItemFailure> {
        self.wait_for(request, caller, cancel, || {
            self.inner.limiter.take_tokens(&caller.owner_id, request.cost)
        })
        .await?;
        self.record(caller, AuditEventType::Admit, caller.owner_id.as_bytes());
        Ok(())
    }

    /// Reserve in-flight, memory and CPU quota for a generation call that
    /// already holds a batch slot. The budget starts when the slot is taken.
    async fn reserve(
        &self,
        request: &GenerationRequest,
        caller: &Caller,
        cancel: &CancelToken,
    ) -> Result<AdmissionGuard, ItemFailure> {
        self.wait_for(request, caller, cancel, || {
            self.inner.limiter.reserve(&caller.owner_id, request.claim())
        })
        .await
    }

    /// Retry `attempt` until it succeeds, the next retry would overrun
    /// `max_admission_wait_ms`, or the batch is cancelled. Every denial is
    /// audited.
    async fn wait_for<T>(
        &self,
        request: &GenerationRequest,
        caller: &Caller,
        cancel: &CancelToken,
        mut attempt: impl FnMut() -> Result<T, Denial>,
    ) -> Result<T, ItemFailure> {
        let budget = Duration::from_millis(self.inner.config.max_admission_wait_ms);
        let started = Instant::now();

        loop {
            let denial = match attempt() {
                Ok(granted) => return Ok(granted),
                Err(denial) => denial,
            };

            let event = if denial.reason.is_quota() {
                AuditEventType::QuotaExceeded
            } else {
                AuditEventType::Deny
            };
            self.record(caller, event, caller.owner_id.as_bytes());

            if denial.reason == DenyReason::CostExceedsCapacity {
                return Err(ItemFailure::InvalidRequest(format!(
                    "cost {} exceeds the rate limit capacity",
                    request.cost
                )));
            }

            let wait = Duration::from_millis(denial.retry_after_ms.max(1));
            if started.elapsed() + wait > budget {
                return Err(ItemFailure::QuotaExceeded {
                    retry_after_ms: denial.retry_after_ms,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ItemFailure::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn record(&self, caller: &Caller, event_type: AuditEventType, subject: &[u8]) {
        self.inner.audit.record(AuditRecord::new(
            caller.correlation_id.clone(),
            event_type,
            subject,
        ));
    }
}
