//! Tag derivation
//!
//! Maps item metadata to a badge label:
//! - Books: file extension, then the item's `Format`
//! - Video (movie, episode, series, season): first video stream height
//! - Audio (track, album, audiobook): first audio stream codec, then container
//!
//! Container items (series, season, album) carry no streams of their own,
//! so [`resolve_item_tag`] first swaps them for a representative child.

use crate::error::ResolveError;
use crate::metadata::{ChildQuery, ItemId, ItemKind, ItemMetadata, MetadataSource, StreamKind};
use crate::tag::QualityTag;
use tracing::debug;

/// Resolution tier for a video stream height
pub fn resolution_tag(height: u32) -> Option<QualityTag> {
    match height {
        h if h >= 2160 => Some(QualityTag::Uhd),
        h if h >= 1080 => Some(QualityTag::Hd1080),
        h if h >= 720 => Some(QualityTag::Hd720),
        h if h > 0 => Some(QualityTag::Sd),
        _ => None,
    }
}

/// Derive a tag from already-fetched metadata
pub fn derive_tag(item: &ItemMetadata) -> Option<QualityTag> {
    if item.kind == ItemKind::Book {
        let from_path = item
            .path
            .as_deref()
            .and_then(|p| p.rsplit_once('.'))
            .and_then(|(_, ext)| QualityTag::from_format_name(ext));
        if let Some(tag) = from_path {
            return Some(tag);
        }
        if let Some(tag) = item.format.as_deref().and_then(QualityTag::from_format_name) {
            return Some(tag);
        }
    }

    if !item.has_media_source {
        return None;
    }

    if item.kind.is_video() {
        let height = item
            .first_stream(StreamKind::Video)
            .and_then(|s| s.height)
            .unwrap_or(0);
        return resolution_tag(height);
    }

    if item.kind.is_audio() {
        let from_codec = item
            .first_stream(StreamKind::Audio)
            .and_then(|s| s.codec.as_deref())
            .and_then(QualityTag::from_format_name);
        return from_codec.or_else(|| item.container.as_deref().and_then(QualityTag::from_format_name));
    }

    None
}

/// Fetch an item (and its representative child if needed) and derive its tag
///
/// `Ok(None)` means "no applicable tag": unsupported type, container with no
/// children, or no usable stream data. Only transport-level problems are
/// errors.
pub async fn resolve_item_tag(
    source: &dyn MetadataSource,
    user_id: &str,
    item_id: &ItemId,
) -> Result<Option<QualityTag>, ResolveError> {
    let mut item = source.get_item(user_id, item_id).await?;
    if !item.kind.is_supported() {
        debug!(item_id = %item_id, kind = item.kind.type_name(), "Unsupported item type");
        return Ok(None);
    }

    let child_query = match item.kind {
        ItemKind::Series | ItemKind::Season => Some(ChildQuery::first_episode()),
        ItemKind::MusicAlbum => Some(ChildQuery::first_track()),
        _ => None,
    };

    if let Some(query) = child_query {
        match source.first_child(user_id, &item.id, &query).await? {
            Some(child_id) => item = source.get_item(user_id, &child_id).await?,
            None => {
                debug!(item_id = %item_id, kind = item.kind.type_name(), "No representative child");
                return Ok(None);
            }
        }
    }

    Ok(derive_tag(&item))
}
