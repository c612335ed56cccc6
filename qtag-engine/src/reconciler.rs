//! Keeps badges consistent with what the page currently shows
//!
//! A reconciliation pass walks every card on the page, renders cached tags
//! straight away, and routes misses either to the scheduler (already on
//! screen) or to the visibility tracker (further down the page). Per-item
//! [`TrackingState`] stops an item being routed twice in one view.
//!
//! [`DomReconciler::run`] is the single consumer of page events. Resolution
//! work runs on a `JoinSet`; completions come back through the same loop,
//! so all tracking state is owned by one task and needs no locking.

use crate::badge::BadgeRenderer;
use crate::context::SessionContext;
use crate::dom::{DomSurface, ElementHandle};
use crate::metadata::ItemId;
use crate::scheduler::{FetchScheduler, ResolveOutcome};
use crate::visibility::VisibilityTracker;
use qtag_common::events::{NavigationKind, PageEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace, warn};

/// Where an item stands within the current view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// Parked with the visibility tracker
    Queued,
    /// Resolution in progress
    Pending,
    /// Tag known and rendered
    Resolved,
    /// No tag; `retryable` items are picked up again by the next pass
    Unresolved { retryable: bool },
}

impl TrackingState {
    /// Whether a pass should leave the item alone
    pub fn is_handled(&self) -> bool {
        !matches!(self, TrackingState::Unresolved { retryable: true })
    }
}

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub containers: usize,
    pub ignored: usize,
    pub rendered: usize,
    pub dispatched: usize,
    pub tracked: usize,
}

/// A finished resolution, tagged with the view it was started from
struct Completion {
    generation: u64,
    item_id: ItemId,
    outcome: ResolveOutcome,
}

pub struct DomReconciler {
    ctx: Arc<SessionContext>,
    dom: Arc<dyn DomSurface>,
    scheduler: FetchScheduler,
    tracker: VisibilityTracker,
    renderer: BadgeRenderer,
    tracking: HashMap<ItemId, TrackingState>,
    /// Containers waiting on an unresolved item
    containers: HashMap<ItemId, Vec<ElementHandle>>,
    generation: u64,
    tasks: JoinSet<Completion>,
}

impl DomReconciler {
    pub fn new(ctx: Arc<SessionContext>, dom: Arc<dyn DomSurface>) -> Self {
        let config = ctx.config();
        let tracker = VisibilityTracker::new(&config.visibility);
        let renderer = BadgeRenderer::new(Arc::clone(&dom), config.reconciler.badge_class.clone());
        let scheduler = FetchScheduler::new(Arc::clone(&ctx));

        Self {
            ctx,
            dom,
            scheduler,
            tracker,
            renderer,
            tracking: HashMap::new(),
            containers: HashMap::new(),
            generation: 0,
            tasks: JoinSet::new(),
        }
    }

    pub fn install_styles(&self) {
        self.renderer.install_styles();
    }

    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }

    pub fn tracker(&self) -> &VisibilityTracker {
        &self.tracker
    }

    pub fn tracking_state(&self, item_id: &ItemId) -> Option<TrackingState> {
        self.tracking.get(item_id).copied()
    }

    /// Navigation generation; bumped on every view change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolutions spawned but not yet applied
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Run one discovery pass over the document
    pub fn reconcile(&mut self) -> PassReport {
        let settings = self.ctx.config().reconciler.clone();
        let has_user = self.ctx.current_user().is_some();
        let mut report = PassReport::default();
        let mut seen = HashSet::new();

        for card in self.dom.query_all(&settings.card_selector) {
            let container = self
                .dom
                .query_within(card, &settings.container_selector)
                .unwrap_or(card);
            if !seen.insert(container) {
                continue;
            }
            report.containers += 1;

            if settings
                .ignore_selectors
                .iter()
                .any(|selector| self.dom.closest_matches(container, selector))
            {
                report.ignored += 1;
                continue;
            }

            let Some(item_id) = self.extract_item_id(container) else {
                continue;
            };

            if let Some(tag) = self.ctx.cached_tag(&item_id) {
                if self.renderer.render(container, &tag) {
                    report.rendered += 1;
                }
                self.tracking.insert(item_id, TrackingState::Resolved);
                continue;
            }

            match self.tracking.get(&item_id).copied() {
                Some(TrackingState::Pending) => {
                    self.wait_on(&item_id, container);
                    continue;
                }
                Some(TrackingState::Queued) if !has_user => {
                    self.wait_on(&item_id, container);
                    continue;
                }
                // Every copy of a parked item is watched; whichever nears
                // the viewport first triggers the fetch
                Some(TrackingState::Queued) => {}
                Some(state) if state.is_handled() => continue,
                _ if !has_user => continue,
                _ => {}
            }

            if self.tracker.is_likely_visible(self.dom.as_ref(), container) {
                self.dispatch(container, item_id);
                report.dispatched += 1;
            } else {
                self.wait_on(&item_id, container);
                if !self.tracker.is_tracked(container) {
                    self.tracker.track(container, item_id.clone());
                    report.tracked += 1;
                }
                self.tracking.insert(item_id, TrackingState::Queued);
            }
        }

        debug!(
            containers = report.containers,
            ignored = report.ignored,
            rendered = report.rendered,
            dispatched = report.dispatched,
            tracked = report.tracked,
            "Reconciliation pass complete"
        );
        report
    }

    fn extract_item_id(&self, container: ElementHandle) -> Option<ItemId> {
        self.dom
            .attribute(container, "href")
            .and_then(|href| ItemId::from_href(&href))
            .or_else(|| {
                self.dom
                    .background_image(container)
                    .and_then(|style| ItemId::from_background_image(&style))
            })
            .or_else(|| {
                self.dom
                    .attribute(container, "data-id")
                    .and_then(|raw| ItemId::parse(&raw))
            })
    }

    fn wait_on(&mut self, item_id: &ItemId, container: ElementHandle) {
        let waiting = self.containers.entry(item_id.clone()).or_default();
        if !waiting.contains(&container) {
            waiting.push(container);
        }
    }

    /// Resolve an item now, with priority
    fn dispatch(&mut self, container: ElementHandle, item_id: ItemId) {
        self.wait_on(&item_id, container);
        self.tracking.insert(item_id.clone(), TrackingState::Pending);

        let scheduler = self.scheduler.clone();
        let generation = self.generation;
        self.tasks.spawn(async move {
            let outcome = scheduler.resolve(&item_id, true).await;
            Completion {
                generation,
                item_id,
                outcome,
            }
        });
    }

    /// Measure parked elements and resolve the ones that came into range
    pub fn on_viewport_changed(&mut self) -> usize {
        let evaluation = self.tracker.evaluate(self.dom.as_ref());

        for (element, item_id) in evaluation.detached {
            if let Some(waiting) = self.containers.get_mut(&item_id) {
                waiting.retain(|el| *el != element);
            }
            if self.tracking.get(&item_id) == Some(&TrackingState::Queued) && !self.tracker.tracks_item(&item_id) {
                self.tracking.remove(&item_id);
                self.containers.remove(&item_id);
            }
        }

        let mut dispatched = 0;
        for (element, item_id) in evaluation.promoted {
            if self.tracking.get(&item_id) == Some(&TrackingState::Queued) {
                self.dispatch(element, item_id);
                dispatched += 1;
            }
        }
        dispatched
    }

    /// The host reported a parked element as intersecting
    pub fn on_intersecting(&mut self, element: ElementHandle) -> bool {
        match self.tracker.promote(element) {
            Some(item_id) if self.tracking.get(&item_id) == Some(&TrackingState::Queued) => {
                self.dispatch(element, item_id);
                true
            }
            _ => false,
        }
    }

    /// Start over for a new view
    ///
    /// In-flight resolutions keep running and still fill the cache, but
    /// their results are no longer rendered by this reconciler.
    pub fn on_navigation(&mut self) -> PassReport {
        self.generation += 1;
        self.tracking.clear();
        self.containers.clear();
        self.tracker.clear();
        debug!(generation = self.generation, "View changed, tracking reset");
        self.reconcile()
    }

    fn apply(&mut self, completion: Completion) {
        let Completion {
            generation,
            item_id,
            outcome,
        } = completion;

        if generation != self.generation {
            trace!(item_id = %item_id, generation, "Discarding result from previous view");
            return;
        }

        let waiting = self.containers.remove(&item_id).unwrap_or_default();
        let state = match &outcome {
            ResolveOutcome::Tagged(tag) => {
                for container in waiting {
                    self.renderer.render(container, tag);
                }
                TrackingState::Resolved
            }
            other => TrackingState::Unresolved {
                retryable: other.is_retryable(),
            },
        };
        trace!(item_id = %item_id, ?state, "Resolution applied");
        self.tracking.insert(item_id, state);
    }

    fn apply_joined(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(completion) => self.apply(completion),
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(error = %e, "Resolution task failed"),
        }
    }

    /// Wait for every outstanding resolution and apply it
    pub async fn settle(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.apply_joined(joined);
        }
    }

    fn on_event(&mut self, event: PageEvent, timers: &mut Timers) {
        match event {
            PageEvent::DomMutated { added_nodes } => {
                trace!(added_nodes, "DOM mutated");
                timers.mutation = Some(Instant::now() + timers.debounce);
            }
            PageEvent::Navigated {
                kind: NavigationKind::BackControl,
            } => {
                timers.back_control = Some(Instant::now() + timers.back_delay);
            }
            PageEvent::Navigated { kind } => {
                debug!(?kind, "Navigation");
                self.on_navigation();
            }
            PageEvent::ViewportChanged => {
                self.on_viewport_changed();
            }
            PageEvent::ElementIntersecting { element } => {
                self.on_intersecting(element);
            }
            PageEvent::Unloading => {
                let evicted = self.ctx.flush_cache();
                debug!(evicted, "Cache flushed before unload");
            }
        }
    }

    /// Consume page events until `shutdown` flips to true
    ///
    /// Outstanding resolutions are aborted on exit.
    pub async fn run(mut self, mut events: broadcast::Receiver<PageEvent>, mut shutdown: watch::Receiver<bool>) {
        let config = self.ctx.config();
        let flush_every = config.cache.flush_interval();
        let mut timers = Timers {
            initial: Some(Instant::now() + config.reconciler.initial_delay()),
            mutation: None,
            back_control: None,
            debounce: config.reconciler.mutation_debounce(),
            back_delay: config.reconciler.back_control_delay(),
        };
        let mut flush_timer = tokio::time::interval_at(Instant::now() + flush_every, flush_every);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        info!("Reconciler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                received = events.recv(), if events_open => match received {
                    Ok(event) => self.on_event(event, &mut timers),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Page events lagged, scheduling a full pass");
                        timers.mutation = Some(Instant::now() + timers.debounce);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Page event source closed");
                        events_open = false;
                    }
                },

                _ = deadline(timers.initial), if timers.initial.is_some() => {
                    timers.initial = None;
                    self.reconcile();
                }

                _ = deadline(timers.mutation), if timers.mutation.is_some() => {
                    timers.mutation = None;
                    self.reconcile();
                }

                _ = deadline(timers.back_control), if timers.back_control.is_some() => {
                    timers.back_control = None;
                    self.on_navigation();
                }

                _ = flush_timer.tick() => {
                    let evicted = self.ctx.flush_cache();
                    trace!(evicted, "Periodic cache flush");
                }

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.apply_joined(joined);
                }
            }
        }

        self.tasks.shutdown().await;
        info!("Reconciler stopped");
    }
}

/// Pending timed passes for the run loop
struct Timers {
    initial: Option<Instant>,
    mutation: Option<Instant>,
    back_control: Option<Instant>,
    debounce: std::time::Duration,
    back_delay: std::time::Duration,
}

fn deadline(at: Option<Instant>) -> Sleep {
    sleep_until(at.unwrap_or_else(Instant::now))
}
