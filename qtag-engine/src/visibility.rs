//! Viewport proximity tracking
//!
//! Elements that are not yet near the viewport are parked here. Each time
//! the viewport changes, parked elements are measured against the viewport
//! grown by the root margin; any element whose visible fraction reaches the
//! threshold is promoted and forgotten. Promotion is one-shot: a promoted
//! element is never parked again by this tracker.

use crate::dom::{DomSurface, ElementHandle, Rect, Viewport};
use crate::metadata::ItemId;
use qtag_common::config::VisibilitySettings;
use std::collections::HashMap;
use tracing::trace;

/// Synchronous "is it on or near screen" check
///
/// True when the box overlaps the viewport grown by `margin` on every side.
pub fn is_likely_visible(rect: &Rect, viewport: &Viewport, margin: f64) -> bool {
    rect.top <= viewport.height + margin
        && rect.bottom() >= -margin
        && rect.left <= viewport.width + margin
        && rect.right() >= -margin
}

/// Fraction of `rect` inside the viewport grown by `margin`
///
/// Zero-area boxes count as fully visible when they touch the area.
pub fn intersection_ratio(rect: &Rect, viewport: &Viewport, margin: f64) -> f64 {
    let root = viewport.expanded(margin);
    let width = rect.right().min(root.right()) - rect.left.max(root.left);
    let height = rect.bottom().min(root.bottom()) - rect.top.max(root.top);
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }
    let area = rect.area();
    if area == 0.0 {
        return 1.0;
    }
    (width * height) / area
}

/// Result of measuring the tracked elements
#[derive(Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Near the viewport, in handle order; no longer tracked
    pub promoted: Vec<(ElementHandle, ItemId)>,
    /// Removed from the document; no longer tracked
    pub detached: Vec<(ElementHandle, ItemId)>,
}

/// One-shot proximity tracker
#[derive(Debug)]
pub struct VisibilityTracker {
    margin: f64,
    threshold: f64,
    tracked: HashMap<ElementHandle, ItemId>,
}

impl VisibilityTracker {
    pub fn new(settings: &VisibilitySettings) -> Self {
        Self {
            margin: settings.root_margin_px,
            threshold: settings.threshold,
            tracked: HashMap::new(),
        }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Start watching an element on behalf of `item_id`
    pub fn track(&mut self, element: ElementHandle, item_id: ItemId) {
        self.tracked.insert(element, item_id);
    }

    pub fn is_tracked(&self, element: ElementHandle) -> bool {
        self.tracked.contains_key(&element)
    }

    /// Whether any element is still tracked on behalf of `item_id`
    pub fn tracks_item(&self, item_id: &ItemId) -> bool {
        self.tracked.values().any(|id| id == item_id)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Whether an element is already near enough to skip tracking
    pub fn is_likely_visible(&self, dom: &dyn DomSurface, element: ElementHandle) -> bool {
        dom.bounding_rect(element)
            .map(|rect| is_likely_visible(&rect, &dom.viewport(), self.margin))
            .unwrap_or(false)
    }

    /// Measure every tracked element and promote the ones near the viewport
    ///
    /// Detached elements stop being tracked and are reported separately.
    pub fn evaluate(&mut self, dom: &dyn DomSurface) -> Evaluation {
        let viewport = dom.viewport();
        let mut result = Evaluation::default();

        for (element, item_id) in &self.tracked {
            match dom.bounding_rect(*element) {
                Some(rect) => {
                    let ratio = intersection_ratio(&rect, &viewport, self.margin);
                    if ratio > 0.0 && ratio >= self.threshold {
                        result.promoted.push((*element, item_id.clone()));
                    }
                }
                None => result.detached.push((*element, item_id.clone())),
            }
        }

        for (element, item_id) in result.promoted.iter().chain(&result.detached) {
            trace!(element = element.0, item_id = %item_id, "Element no longer tracked");
            self.tracked.remove(element);
        }
        result.promoted.sort_by_key(|(el, _)| *el);
        result.detached.sort_by_key(|(el, _)| *el);
        result
    }

    /// Promote an element the host itself reported as intersecting
    pub fn promote(&mut self, element: ElementHandle) -> Option<ItemId> {
        self.tracked.remove(&element)
    }

    /// Forget every tracked element
    pub fn clear(&mut self) {
        self.tracked.clear();
    }
}
