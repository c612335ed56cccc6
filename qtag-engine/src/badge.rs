//! Badge rendering

use crate::dom::{Badge, DomSurface, ElementHandle, Positioning};
use crate::tag::QualityTag;
use std::sync::Arc;

/// Id of the shared stylesheet
pub const STYLE_ID: &str = "quality-tag-style";

/// Color for tags outside the vocabulary (same grey as SD)
pub const DEFAULT_COLOR: &str = "rgba(150,150,150,0.85)";

/// Background color for a tag
pub fn badge_color(tag: &QualityTag) -> &'static str {
    match tag {
        QualityTag::Hd720 => "rgba(255,165,0,0.85)",
        QualityTag::Hd1080 => "rgba(0,204,204,0.85)",
        QualityTag::Uhd => "rgba(0,153,51,0.85)",
        QualityTag::Sd => DEFAULT_COLOR,
        QualityTag::Mp3 => "rgba(255,192,203,0.85)",
        QualityTag::Flac => "rgba(255,218,185,0.85)",
        QualityTag::M4a => "rgba(255,255,204,0.85)",
        QualityTag::Opus => "rgba(173,216,230,0.85)",
        QualityTag::Aac => "rgba(152,251,152,0.85)",
        QualityTag::Ogg => "rgba(221,160,221,0.85)",
        QualityTag::Epub => "rgba(176,196,222,0.85)",
        QualityTag::Pdf => "rgba(205,133,63,0.85)",
        QualityTag::Mobi => "rgba(222,184,135,0.85)",
        QualityTag::Azw3 => "rgba(240,230,140,0.85)",
        QualityTag::Cbz => "rgba(255,228,196,0.85)",
        QualityTag::Cbr => "rgba(255,222,173,0.85)",
        QualityTag::Djvu => "rgba(221,160,221,0.85)",
        QualityTag::Pdb => "rgba(176,224,230,0.85)",
        QualityTag::Fb2 => "rgba(152,251,152,0.85)",
        QualityTag::Unrecognized(_) => DEFAULT_COLOR,
    }
}

/// Attaches at most one badge per container
pub struct BadgeRenderer {
    dom: Arc<dyn DomSurface>,
    class_name: String,
}

impl BadgeRenderer {
    pub fn new(dom: Arc<dyn DomSurface>, class_name: impl Into<String>) -> Self {
        Self {
            dom,
            class_name: class_name.into(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Install the shared stylesheet (idempotent)
    pub fn install_styles(&self) {
        let css = format!(
            ".{}{{user-select:none;pointer-events:none;}}",
            self.class_name
        );
        self.dom.ensure_style(STYLE_ID, &css);
    }

    /// Build the badge element for a tag
    pub fn badge_for(&self, tag: &QualityTag) -> Badge {
        Badge {
            class_name: self.class_name.clone(),
            text: tag.label().to_string(),
            style: format!(
                "background:{};position:absolute;top:6px;left:6px;color:white;padding:2px 6px;\
                 font-size:12px;font-weight:bold;border-radius:4px;z-index:99;\
                 pointer-events:none;user-select:none;",
                badge_color(tag)
            ),
        }
    }

    /// Attach a badge unless the container already has one
    ///
    /// Returns whether a badge was added. A statically positioned container
    /// is switched to relative positioning first so the badge can overlay it.
    pub fn render(&self, container: ElementHandle, tag: &QualityTag) -> bool {
        if self.dom.has_descendant_with_class(container, &self.class_name) {
            return false;
        }
        if self.dom.positioning(container) == Positioning::Static {
            self.dom.set_positioning(container, Positioning::Relative);
        }
        self.dom.append_badge(container, self.badge_for(tag));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, Viewport, VirtualDocument};

    fn setup() -> (Arc<VirtualDocument>, BadgeRenderer) {
        let doc = Arc::new(VirtualDocument::new(Viewport::new(800.0, 600.0)));
        let renderer = BadgeRenderer::new(doc.clone(), "quality-overlay-label");
        (doc, renderer)
    }

    #[test]
    fn test_render_is_idempotent() {
        let (doc, renderer) = setup();
        let el = doc.append(doc.root(), ElementSpec::new("a"));

        assert!(renderer.render(el, &QualityTag::Uhd));
        assert!(!renderer.render(el, &QualityTag::Sd));

        let badges = doc.badges(el);
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].text, "UHD");
        assert!(badges[0].style.starts_with("background:rgba(0,153,51,0.85);"));
    }

    #[test]
    fn test_static_container_becomes_relative() {
        let (doc, renderer) = setup();
        let static_el = doc.append(doc.root(), ElementSpec::new("a"));
        let absolute_el = doc.append(
            doc.root(),
            ElementSpec::new("a").positioning(Positioning::Absolute),
        );

        renderer.render(static_el, &QualityTag::Flac);
        renderer.render(absolute_el, &QualityTag::Flac);

        assert_eq!(doc.positioning(static_el), Positioning::Relative);
        assert_eq!(doc.positioning(absolute_el), Positioning::Absolute);
    }

    #[test]
    fn test_unrecognized_tag_uses_default_color() {
        let (_doc, renderer) = setup();
        let badge = renderer.badge_for(&QualityTag::Unrecognized("8K".into()));
        assert_eq!(badge.text, "8K");
        assert!(badge.style.contains(DEFAULT_COLOR));
    }

    #[test]
    fn test_every_known_tag_has_a_color() {
        for tag in QualityTag::KNOWN.iter() {
            assert!(badge_color(tag).starts_with("rgba("));
        }
    }

    #[test]
    fn test_install_styles_once() {
        let (doc, renderer) = setup();
        renderer.install_styles();
        renderer.install_styles();
        assert!(doc.style(STYLE_ID).unwrap().contains(".quality-overlay-label"));
    }
}
