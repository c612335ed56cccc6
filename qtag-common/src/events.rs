//! Page event definitions and the event bus
//!
//! The host page (browser bridge, webview shell, test harness) publishes
//! what happened to the document: nodes were inserted, the in-app router
//! navigated, the viewport scrolled, an element crossed the proximity
//! margin. The reconciler is the single consumer of these events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Opaque handle to a host element
///
/// Handles are issued by the host document and are only meaningful to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// How the in-app router changed views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationKind {
    /// `history.pushState` was called
    PushState,
    /// `history.replaceState` was called
    ReplaceState,
    /// Browser back/forward
    PopState,
    /// The application's own header "back" control was clicked
    BackControl,
}

/// Events published by the host page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageEvent {
    /// Nodes were inserted somewhere under the document body
    DomMutated {
        /// Number of inserted nodes in this batch (diagnostic only)
        added_nodes: usize,
    },

    /// Single-page navigation happened
    Navigated { kind: NavigationKind },

    /// The viewport scrolled or resized
    ViewportChanged,

    /// The host's own proximity observer reported an element as intersecting
    ElementIntersecting { element: ElementHandle },

    /// The page is about to be torn down
    Unloading,
}

/// Something that hands out page event subscriptions
///
/// The reconciler depends on this, not on how the host intercepts history
/// calls or observes the DOM.
pub trait NavigationSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<PageEvent>;
}

/// Page event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the host)
/// - Multiple concurrent subscribers
/// - Lagged receivers are told how many events they missed
///
/// # Examples
///
/// ```
/// use qtag_common::events::{NavigationKind, PageEvent, PageEventBus};
///
/// let bus = PageEventBus::new(64);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(PageEvent::Navigated { kind: NavigationKind::PushState });
/// assert!(matches!(rx.try_recv(), Ok(PageEvent::Navigated { .. })));
/// ```
#[derive(Clone)]
pub struct PageEventBus {
    tx: broadcast::Sender<PageEvent>,
    capacity: usize,
}

impl PageEventBus {
    /// Creates a new bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PageEvent,
    ) -> Result<usize, broadcast::error::SendError<PageEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PageEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PageEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NavigationSource for PageEventBus {
    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        PageEventBus::subscribe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = PageEventBus::new(8);
        assert!(bus.emit(PageEvent::ViewportChanged).is_err());
        // lossy variant must not panic
        bus.emit_lossy(PageEvent::ViewportChanged);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = PageEventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(PageEvent::DomMutated { added_nodes: 3 }).unwrap();
        bus.emit(PageEvent::Navigated {
            kind: NavigationKind::BackControl,
        })
        .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            PageEvent::DomMutated { added_nodes: 3 }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            PageEvent::Navigated {
                kind: NavigationKind::BackControl
            }
        );
    }

    #[test]
    fn test_navigation_source_subscribe() {
        let bus = PageEventBus::default();
        let source: &dyn NavigationSource = &bus;
        let _rx = source.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.capacity(), 256);
    }

    #[test]
    fn test_page_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&PageEvent::ElementIntersecting {
            element: ElementHandle(7),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"ElementIntersecting","element":7}"#);
    }
}
