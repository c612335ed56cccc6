//! Item identifiers and their extraction from page markup

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Link query parameter carrying an item id, e.g. `#/details?id=<id>&serverId=..`
static HREF_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)id=([a-f0-9]{32})").expect("static regex"));

/// Image URL path segment carrying an item id, e.g. `url("/Items/<id>/Images/Primary")`
static IMAGE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/Items/([a-f0-9]{32})/").expect("static regex"));

/// Opaque 32-character library item identifier
///
/// Always stored lowercase so ids lifted from differently-cased markup hit
/// the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    pub const LEN: usize = 32;

    /// Validate and normalise an identifier
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == Self::LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Pull an id out of a link href (`id=<32 hex>`)
    pub fn from_href(href: &str) -> Option<Self> {
        HREF_ID
            .captures(href)
            .and_then(|c| c.get(1))
            .and_then(|m| Self::parse(m.as_str()))
    }

    /// Pull an id out of a background-image URL (`/Items/<32 hex>/`)
    pub fn from_background_image(style: &str) -> Option<Self> {
        IMAGE_ID
            .captures(style)
            .and_then(|c| c.get(1))
            .and_then(|m| Self::parse(m.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ItemId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a 32-character hex item id: {value:?}"))
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}
