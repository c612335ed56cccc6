//! Fetch scheduling
//!
//! Every resolution goes through [`FetchScheduler::resolve`], which enforces:
//! - at most one attempt in flight per item (duplicates join it)
//! - a bounded number of attempts waiting to fetch
//! - a short fixed delay for priority (on-screen) items, the current
//!   backoff delay for everything else
//! - a process-wide request rate ceiling
//! - a per-request timeout
//!
//! Outcomes feed the shared backoff counter: transient failures widen the
//! delay, successes reset it. "No applicable tag" is not a failure.

use crate::context::SessionContext;
use crate::derive::resolve_item_tag;
use crate::error::ResolveError;
use crate::metadata::ItemId;
use crate::tag::QualityTag;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Why a resolution did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nobody is signed in
    NoUser,
    /// Too many attempts already waiting
    QueueFull,
    /// Joined an attempt that was cancelled before finishing
    Abandoned,
}

/// Result of one resolution request
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Tagged(QualityTag),
    /// Resolved, but nothing to show
    NoTag,
    /// Transient failure; counted toward backoff
    Failed,
    Skipped(SkipReason),
}

impl ResolveOutcome {
    pub fn tag(&self) -> Option<&QualityTag> {
        match self {
            ResolveOutcome::Tagged(tag) => Some(tag),
            _ => None,
        }
    }

    /// Whether a later reconciliation pass may try this item again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveOutcome::Failed | ResolveOutcome::Skipped(_))
    }
}

type InFlight = HashMap<ItemId, watch::Receiver<Option<ResolveOutcome>>>;

struct SchedulerState {
    inflight: Mutex<InFlight>,
    queued: AtomicUsize,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl SchedulerState {
    fn inflight(&self) -> MutexGuard<'_, InFlight> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the in-flight slot for an item and publishes its outcome
///
/// Dropping without [`InFlightGuard::complete`] (task cancelled) leaves
/// joiners with [`SkipReason::Abandoned`].
struct InFlightGuard {
    state: Arc<SchedulerState>,
    item_id: ItemId,
    tx: watch::Sender<Option<ResolveOutcome>>,
}

impl InFlightGuard {
    fn complete(self, outcome: ResolveOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.inflight().remove(&self.item_id);
    }
}

/// One slot in the bounded wait queue
struct QueueSlot {
    state: Arc<SchedulerState>,
}

impl QueueSlot {
    fn try_acquire(state: &Arc<SchedulerState>, capacity: usize) -> Option<Self> {
        state
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.state.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Claim {
    Join(watch::Receiver<Option<ResolveOutcome>>),
    Run(InFlightGuard, QueueSlot),
    Full(usize),
}

/// Cloneable handle; clones share dedup, queue and rate state
#[derive(Clone)]
pub struct FetchScheduler {
    ctx: Arc<SessionContext>,
    state: Arc<SchedulerState>,
}

impl FetchScheduler {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let rate = ctx.config().scheduler.max_requests_per_second;
        let limiter = NonZeroU32::new(rate).map(|n| RateLimiter::direct(Quota::per_second(n)));

        Self {
            ctx,
            state: Arc::new(SchedulerState {
                inflight: Mutex::new(HashMap::new()),
                queued: AtomicUsize::new(0),
                limiter,
            }),
        }
    }

    /// Attempts currently waiting for their fetch slot
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.state.inflight().len()
    }

    pub fn is_in_flight(&self, item_id: &ItemId) -> bool {
        self.state.inflight().contains_key(item_id)
    }

    /// Resolve an item's tag, waiting out the scheduling delay first
    ///
    /// A cache hit returns without delay. A call for an item that already
    /// has an attempt in flight waits for that attempt and shares its result.
    pub async fn resolve(&self, item_id: &ItemId, priority: bool) -> ResolveOutcome {
        if let Some(tag) = self.ctx.cached_tag(item_id) {
            return ResolveOutcome::Tagged(tag);
        }

        let Some(user_id) = self.ctx.current_user() else {
            debug!(item_id = %item_id, "No signed-in user, skipping");
            return ResolveOutcome::Skipped(SkipReason::NoUser);
        };

        let claim = {
            let mut inflight = self.state.inflight();
            match inflight.get(item_id).cloned() {
                Some(rx) => Claim::Join(rx),
                None => {
                    let capacity = self.ctx.config().scheduler.max_queue_size;
                    match QueueSlot::try_acquire(&self.state, capacity) {
                        Some(slot) => {
                            let (tx, rx) = watch::channel(None);
                            inflight.insert(item_id.clone(), rx);
                            let guard = InFlightGuard {
                                state: Arc::clone(&self.state),
                                item_id: item_id.clone(),
                                tx,
                            };
                            Claim::Run(guard, slot)
                        }
                        None => Claim::Full(capacity),
                    }
                }
            }
        };

        match claim {
            Claim::Join(rx) => Self::join(rx).await,
            Claim::Full(capacity) => {
                warn!(item_id = %item_id, capacity, "Fetch queue full, dropping request");
                ResolveOutcome::Skipped(SkipReason::QueueFull)
            }
            Claim::Run(guard, slot) => {
                let outcome = self.attempt(&user_id, item_id, priority, slot).await;
                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    async fn join(mut rx: watch::Receiver<Option<ResolveOutcome>>) -> ResolveOutcome {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(ResolveOutcome::Skipped(SkipReason::Abandoned)),
            Err(_) => ResolveOutcome::Skipped(SkipReason::Abandoned),
        }
    }

    async fn attempt(&self, user_id: &str, item_id: &ItemId, priority: bool, slot: QueueSlot) -> ResolveOutcome {
        let settings = &self.ctx.config().scheduler;
        let delay = if priority {
            settings.priority_delay()
        } else {
            self.ctx.current_delay()
        };

        debug!(
            item_id = %item_id,
            priority,
            delay_ms = delay.as_millis() as u64,
            "Scheduling fetch"
        );
        tokio::time::sleep(delay).await;

        // Another path may have filled the cache while we waited
        if let Some(tag) = self.ctx.cached_tag(item_id) {
            return ResolveOutcome::Tagged(tag);
        }

        if let Some(limiter) = &self.state.limiter {
            limiter.until_ready().await;
        }
        drop(slot);

        let timeout = settings.request_timeout();
        let result = match tokio::time::timeout(
            timeout,
            resolve_item_tag(self.ctx.metadata(), user_id, item_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Ok(Some(tag)) => {
                self.ctx.store_tag(item_id.clone(), tag.clone()).await;
                self.ctx.record_success();
                ResolveOutcome::Tagged(tag)
            }
            Ok(None) => {
                debug!(item_id = %item_id, "No applicable tag");
                ResolveOutcome::NoTag
            }
            Err(e) => {
                let next_delay = self.ctx.record_failure();
                warn!(
                    item_id = %item_id,
                    error = %e,
                    consecutive_errors = self.ctx.consecutive_errors(),
                    next_delay_ms = next_delay.as_millis() as u64,
                    "Tag resolution failed"
                );
                ResolveOutcome::Failed
            }
        }
    }
}
