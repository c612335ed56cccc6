//! In-memory document
//!
//! A small element tree implementing [`DomSurface`] for headless hosts and
//! tests. Selector support covers what the overlay's configuration uses:
//! type, `#id`, `.class`, compounds of those, the descendant combinator
//! (`>` is treated as a descendant combinator) and comma-separated lists.

use super::{Badge, DomSurface, ElementHandle, Positioning, Rect, Viewport};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Description of an element to insert
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attributes: HashMap<String, String>,
    background_image: Option<String>,
    rect: Rect,
    positioning: Positioning,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class_name: &str) -> Self {
        self.classes.push(class_name.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn background_image(mut self, value: &str) -> Self {
        self.background_image = Some(value.to_string());
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn positioning(mut self, positioning: Positioning) -> Self {
        self.positioning = positioning;
        self
    }
}

#[derive(Debug)]
struct Node {
    spec: ElementSpec,
    parent: Option<ElementHandle>,
    children: Vec<ElementHandle>,
    badges: Vec<Badge>,
    attached: bool,
}

#[derive(Debug)]
struct Inner {
    nodes: HashMap<ElementHandle, Node>,
    next_id: u64,
    viewport: Viewport,
    styles: HashMap<String, String>,
}

/// In-memory [`DomSurface`]
#[derive(Debug)]
pub struct VirtualDocument {
    root: ElementHandle,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

fn parse_compound(text: &str) -> Compound {
    let mut compound = Compound::default();
    let mut kind = 't';
    let mut buf = String::new();
    for ch in text.chars().chain(std::iter::once('\0')) {
        if matches!(ch, '.' | '#' | '\0') {
            if !buf.is_empty() {
                match kind {
                    't' if buf != "*" => compound.tag = Some(buf.to_ascii_lowercase()),
                    't' => {}
                    '#' => compound.id = Some(buf.clone()),
                    _ => compound.classes.push(buf.clone()),
                }
                buf.clear();
            }
            kind = ch;
        } else {
            buf.push(ch);
        }
    }
    compound
}

fn parse_selector_list(selector: &str) -> Vec<Vec<Compound>> {
    selector
        .split(',')
        .map(|complex| {
            complex
                .split_whitespace()
                .filter(|part| *part != ">")
                .map(parse_compound)
                .collect::<Vec<_>>()
        })
        .filter(|parts| !parts.is_empty())
        .collect()
}

impl Inner {
    fn node(&self, el: ElementHandle) -> Option<&Node> {
        self.nodes.get(&el)
    }

    fn matches_compound(&self, el: ElementHandle, compound: &Compound) -> bool {
        let Some(node) = self.node(el) else {
            return false;
        };
        if let Some(tag) = &compound.tag {
            if &node.spec.tag != tag {
                return false;
            }
        }
        if let Some(id) = &compound.id {
            if node.spec.id.as_ref() != Some(id) {
                return false;
            }
        }
        compound
            .classes
            .iter()
            .all(|c| node.spec.classes.iter().any(|have| have == c))
    }

    fn parent(&self, el: ElementHandle) -> Option<ElementHandle> {
        self.node(el).and_then(|n| n.parent)
    }

    fn matches_complex(&self, el: ElementHandle, parts: &[Compound]) -> bool {
        let Some((last, mut remaining)) = parts.split_last() else {
            return false;
        };
        if !self.matches_compound(el, last) {
            return false;
        }
        let mut cursor = self.parent(el);
        while let Some((wanted, before)) = remaining.split_last() {
            loop {
                match cursor {
                    None => return false,
                    Some(ancestor) => {
                        cursor = self.parent(ancestor);
                        if self.matches_compound(ancestor, wanted) {
                            break;
                        }
                    }
                }
            }
            remaining = before;
        }
        true
    }

    fn matches(&self, el: ElementHandle, list: &[Vec<Compound>]) -> bool {
        list.iter().any(|parts| self.matches_complex(el, parts))
    }

    /// Depth-first, document-order descendants of `root` (excluding it)
    fn descendants(&self, root: ElementHandle) -> Vec<ElementHandle> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementHandle> = self
            .node(root)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(el) = stack.pop() {
            out.push(el);
            if let Some(node) = self.node(el) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn detach(&mut self, el: ElementHandle) {
        for d in self.descendants(el) {
            if let Some(node) = self.nodes.get_mut(&d) {
                node.attached = false;
            }
        }
        if let Some(node) = self.nodes.get_mut(&el) {
            node.attached = false;
        }
    }
}

impl VirtualDocument {
    /// Empty document with a `body` root
    pub fn new(viewport: Viewport) -> Self {
        let root = ElementHandle(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                spec: ElementSpec::new("body"),
                parent: None,
                children: Vec::new(),
                badges: Vec::new(),
                attached: true,
            },
        );
        Self {
            root,
            inner: Mutex::new(Inner {
                nodes,
                next_id: 1,
                viewport,
                styles: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> ElementHandle {
        self.root
    }

    /// Append a new element as the last child of `parent`
    pub fn append(&self, parent: ElementHandle, spec: ElementSpec) -> ElementHandle {
        let mut inner = self.lock();
        let handle = ElementHandle(inner.next_id);
        inner.next_id += 1;
        let attached = inner.node(parent).map(|p| p.attached).unwrap_or(false);
        inner.nodes.insert(
            handle,
            Node {
                spec,
                parent: Some(parent),
                children: Vec::new(),
                badges: Vec::new(),
                attached,
            },
        );
        if let Some(p) = inner.nodes.get_mut(&parent) {
            p.children.push(handle);
        }
        handle
    }

    /// Detach an element and its subtree; handles stay valid but inert
    pub fn remove(&self, el: ElementHandle) {
        let mut inner = self.lock();
        if let Some(parent) = inner.parent(el) {
            if let Some(p) = inner.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != el);
            }
        }
        inner.detach(el);
    }

    /// Detach everything under the root, as a view change would
    pub fn clear(&self) {
        let children = self
            .lock()
            .node(self.root)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            self.remove(child);
        }
    }

    pub fn set_rect(&self, el: ElementHandle, rect: Rect) {
        if let Some(node) = self.lock().nodes.get_mut(&el) {
            node.spec.rect = rect;
        }
    }

    /// Scroll the page down by `dy` pixels
    pub fn scroll_by(&self, dy: f64) {
        let mut inner = self.lock();
        for node in inner.nodes.values_mut() {
            node.spec.rect.top -= dy;
        }
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.lock().viewport = viewport;
    }

    /// Badges attached directly to `el`
    pub fn badges(&self, el: ElementHandle) -> Vec<Badge> {
        self.lock()
            .node(el)
            .map(|n| n.badges.clone())
            .unwrap_or_default()
    }

    /// Badges attached anywhere in the attached document
    pub fn badge_count(&self) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|n| n.attached)
            .map(|n| n.badges.len())
            .sum()
    }

    pub fn style(&self, id: &str) -> Option<String> {
        self.lock().styles.get(id).cloned()
    }

    pub fn is_attached(&self, el: ElementHandle) -> bool {
        self.lock().node(el).map(|n| n.attached).unwrap_or(false)
    }
}

impl DomSurface for VirtualDocument {
    fn query_all(&self, selector: &str) -> Vec<ElementHandle> {
        let list = parse_selector_list(selector);
        let inner = self.lock();
        inner
            .descendants(self.root)
            .into_iter()
            .filter(|el| inner.matches(*el, &list))
            .collect()
    }

    fn query_within(&self, root: ElementHandle, selector: &str) -> Option<ElementHandle> {
        let list = parse_selector_list(selector);
        let inner = self.lock();
        inner
            .descendants(root)
            .into_iter()
            .find(|el| inner.matches(*el, &list))
    }

    fn closest_matches(&self, element: ElementHandle, selector: &str) -> bool {
        let list = parse_selector_list(selector);
        let inner = self.lock();
        let mut cursor = Some(element);
        while let Some(el) = cursor {
            if inner.matches(el, &list) {
                return true;
            }
            cursor = inner.parent(el);
        }
        false
    }

    fn attribute(&self, element: ElementHandle, name: &str) -> Option<String> {
        self.lock()
            .node(element)
            .and_then(|n| n.spec.attributes.get(name).cloned())
    }

    fn background_image(&self, element: ElementHandle) -> Option<String> {
        self.lock()
            .node(element)
            .and_then(|n| n.spec.background_image.clone())
    }

    fn bounding_rect(&self, element: ElementHandle) -> Option<Rect> {
        self.lock()
            .node(element)
            .filter(|n| n.attached)
            .map(|n| n.spec.rect)
    }

    fn viewport(&self) -> Viewport {
        self.lock().viewport
    }

    fn has_descendant_with_class(&self, element: ElementHandle, class_name: &str) -> bool {
        let inner = self.lock();
        let badge_match =
            |el: &ElementHandle| inner.node(*el).map_or(false, |n| n.badges.iter().any(|b| b.class_name == class_name));
        if badge_match(&element) {
            return true;
        }
        inner.descendants(element).iter().any(|el| {
            badge_match(el)
                || inner
                    .node(*el)
                    .map_or(false, |n| n.spec.classes.iter().any(|c| c == class_name))
        })
    }

    fn positioning(&self, element: ElementHandle) -> Positioning {
        self.lock()
            .node(element)
            .map(|n| n.spec.positioning)
            .unwrap_or_default()
    }

    fn set_positioning(&self, element: ElementHandle, positioning: Positioning) {
        if let Some(node) = self.lock().nodes.get_mut(&element) {
            node.spec.positioning = positioning;
        }
    }

    fn append_badge(&self, element: ElementHandle, badge: Badge) {
        if let Some(node) = self.lock().nodes.get_mut(&element) {
            if node.attached {
                node.badges.push(badge);
            }
        }
    }

    fn ensure_style(&self, id: &str, css: &str) {
        self.lock()
            .styles
            .entry(id.to_string())
            .or_insert_with(|| css.to_string());
    }
}
