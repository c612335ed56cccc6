//! Host document surface
//!
//! The engine never touches a real DOM. Hosts implement [`DomSurface`] over
//! whatever document they have; selectors are opaque strings taken from
//! configuration and only interpreted by the host.

pub mod virtual_dom;

pub use qtag_common::events::ElementHandle;
pub use virtual_dom::{ElementSpec, VirtualDocument};

/// Element bounding box in viewport coordinates (logical pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Visible area of the page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Viewport rectangle grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Rect {
        Rect::new(
            -margin,
            -margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }
}

/// CSS `position` of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Positioning {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

/// Badge element to attach to a container
#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    pub class_name: String,
    pub text: String,
    /// Inline style declarations
    pub style: String,
}

/// Operations the engine needs from the host document
pub trait DomSurface: Send + Sync {
    /// All elements matching `selector`, in document order
    fn query_all(&self, selector: &str) -> Vec<ElementHandle>;

    /// First descendant of `root` matching `selector`
    fn query_within(&self, root: ElementHandle, selector: &str) -> Option<ElementHandle>;

    /// Whether `element` or any ancestor matches `selector`
    fn closest_matches(&self, element: ElementHandle, selector: &str) -> bool;

    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String>;

    /// Inline `background-image` value
    fn background_image(&self, element: ElementHandle) -> Option<String>;

    /// Bounding box, or `None` once the element is detached
    fn bounding_rect(&self, element: ElementHandle) -> Option<Rect>;

    fn viewport(&self) -> Viewport;

    fn has_descendant_with_class(&self, element: ElementHandle, class_name: &str) -> bool;

    /// Computed positioning
    fn positioning(&self, element: ElementHandle) -> Positioning;

    fn set_positioning(&self, element: ElementHandle, positioning: Positioning);

    /// Append a badge as the last child of `element`
    fn append_badge(&self, element: ElementHandle, badge: Badge);

    /// Install a stylesheet once under `id`
    fn ensure_style(&self, id: &str, css: &str);
}
