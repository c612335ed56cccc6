//! Raw upstream response shapes and their validation
//!
//! Every field is optional on the wire. A response that is valid JSON but
//! does not fit these shapes maps to an unsupported item (no tag) instead
//! of an error; only a body that is not JSON at all counts as a failure.

use super::{ItemId, ItemKind, ItemMetadata, MediaStream, StreamKind};
use crate::error::ResolveError;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Kind given to items whose response did not fit the expected shape
pub const MALFORMED_KIND: &str = "<malformed>";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawItem {
    pub id: Option<String>,
    #[serde(rename = "Type")]
    pub item_type: Option<String>,
    pub path: Option<String>,
    pub format: Option<String>,
    pub media_sources: Option<Vec<RawMediaSource>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawMediaSource {
    pub container: Option<String>,
    pub media_streams: Option<Vec<RawMediaStream>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawMediaStream {
    #[serde(rename = "Type")]
    pub stream_type: Option<String>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub channel_layout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawItemsResponse {
    pub items: Option<Vec<RawItem>>,
    pub total_record_count: Option<u64>,
}

/// Decode a response body into a JSON value
pub fn parse_body(body: &str) -> Result<Value, ResolveError> {
    serde_json::from_str(body).map_err(|e| ResolveError::Parse(format!("Response is not JSON: {}", e)))
}

/// Map an item response into validated metadata
///
/// `requested` is used as the id when the response does not carry a usable
/// one, so the result always describes the item that was asked for.
pub fn map_item(requested: &ItemId, value: Value) -> ItemMetadata {
    let raw: RawItem = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(item_id = %requested, error = %e, "Item response shape mismatch");
            return ItemMetadata::new(requested.clone(), ItemKind::Other(MALFORMED_KIND.into()));
        }
    };

    let id = raw
        .id
        .as_deref()
        .and_then(ItemId::parse)
        .unwrap_or_else(|| requested.clone());
    let kind = raw
        .item_type
        .as_deref()
        .map(ItemKind::from_type_name)
        .unwrap_or_else(|| ItemKind::Other(MALFORMED_KIND.into()));

    let mut meta = ItemMetadata::new(id, kind);
    meta.path = raw.path.filter(|p| !p.is_empty());
    meta.format = raw.format.filter(|f| !f.is_empty());

    if let Some(source) = raw.media_sources.and_then(|s| s.into_iter().next()) {
        meta.has_media_source = true;
        meta.container = source.container.filter(|c| !c.is_empty());
        meta.streams = source
            .media_streams
            .unwrap_or_default()
            .into_iter()
            .map(map_stream)
            .collect();
    }

    meta
}

fn map_stream(raw: RawMediaStream) -> MediaStream {
    let kind = match raw.stream_type.as_deref() {
        Some("Video") => StreamKind::Video,
        Some("Audio") => StreamKind::Audio,
        _ => StreamKind::Other,
    };
    MediaStream {
        kind,
        height: raw.height,
        codec: raw.codec.filter(|c| !c.is_empty()),
        channel_layout: raw.channel_layout,
    }
}

/// Map a child listing into the first child's id
pub fn map_first_child(value: Value) -> Option<ItemId> {
    let raw: RawItemsResponse = serde_json::from_value(value).ok()?;
    raw.items?
        .into_iter()
        .next()
        .and_then(|item| item.id)
        .and_then(|id| ItemId::parse(&id))
}
