//! Typed metadata boundary
//!
//! The upstream service is treated as opaque. Whatever it returns is mapped
//! into [`ItemMetadata`] before anything else looks at it (see [`raw`]), and
//! the rest of the engine only ever sees these types.

pub mod item_id;
pub mod jellyfin;
pub mod raw;

pub use item_id::ItemId;

use crate::error::ResolveError;
use async_trait::async_trait;
use std::sync::RwLock;

/// Library item type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Movie,
    Episode,
    Series,
    Season,
    Audio,
    MusicAlbum,
    AudioBook,
    Book,
    /// Anything the overlay has no tag for (people, folders, playlists...)
    Other(String),
}

impl ItemKind {
    /// Map the upstream `Type` string
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "Movie" => Self::Movie,
            "Episode" => Self::Episode,
            "Series" => Self::Series,
            "Season" => Self::Season,
            "Audio" => Self::Audio,
            "MusicAlbum" => Self::MusicAlbum,
            "AudioBook" => Self::AudioBook,
            "Book" => Self::Book,
            other => Self::Other(other.to_string()),
        }
    }

    /// Upstream `Type` string
    pub fn type_name(&self) -> &str {
        match self {
            Self::Movie => "Movie",
            Self::Episode => "Episode",
            Self::Series => "Series",
            Self::Season => "Season",
            Self::Audio => "Audio",
            Self::MusicAlbum => "MusicAlbum",
            Self::AudioBook => "AudioBook",
            Self::Book => "Book",
            Self::Other(name) => name,
        }
    }

    /// Whether the overlay can ever produce a tag for this kind
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Movie | Self::Episode | Self::Series | Self::Season)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::MusicAlbum | Self::AudioBook)
    }
}

/// Media stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// One stream of the item's primary media source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub kind: StreamKind,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub channel_layout: Option<String>,
}

/// Validated item metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    pub id: ItemId,
    pub kind: ItemKind,
    pub path: Option<String>,
    pub format: Option<String>,
    /// Container of the first media source
    pub container: Option<String>,
    /// Streams of the first media source
    pub streams: Vec<MediaStream>,
    /// Whether the item had any media source at all
    pub has_media_source: bool,
}

impl ItemMetadata {
    /// Bare metadata with no media information
    pub fn new(id: ItemId, kind: ItemKind) -> Self {
        Self {
            id,
            kind,
            path: None,
            format: None,
            container: None,
            streams: Vec::new(),
            has_media_source: false,
        }
    }

    /// Add a stream to the first media source, creating it if needed
    pub fn push_stream(&mut self, stream: MediaStream) {
        self.has_media_source = true;
        self.streams.push(stream);
    }

    pub fn first_stream(&self, kind: StreamKind) -> Option<&MediaStream> {
        self.streams.iter().find(|s| s.kind == kind)
    }
}

/// Sort key for child lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    PremiereDate,
    TrackNumber,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PremiereDate => "PremiereDate",
            Self::TrackNumber => "TrackNumber",
        }
    }
}

/// "First child of type X, sorted ascending by Y" lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildQuery {
    pub include: ItemKind,
    pub sort_by: SortKey,
    pub recursive: bool,
}

impl ChildQuery {
    /// Earliest-premiering episode anywhere under a series or season
    pub fn first_episode() -> Self {
        Self {
            include: ItemKind::Episode,
            sort_by: SortKey::PremiereDate,
            recursive: true,
        }
    }

    /// Lowest-numbered track directly under an album
    pub fn first_track() -> Self {
        Self {
            include: ItemKind::Audio,
            sort_by: SortKey::TrackNumber,
            recursive: false,
        }
    }
}

/// Upstream metadata service
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch one item as seen by `user_id`
    async fn get_item(&self, user_id: &str, item_id: &ItemId) -> Result<ItemMetadata, ResolveError>;

    /// Find the representative child of a container item, if any
    async fn first_child(
        &self,
        user_id: &str,
        parent_id: &ItemId,
        query: &ChildQuery,
    ) -> Result<Option<ItemId>, ResolveError>;
}

/// Identity of the signed-in user
pub trait SessionProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Session provider the host updates on login/logout
#[derive(Debug, Default)]
pub struct UserSession {
    user_id: RwLock<Option<String>>,
}

impl UserSession {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: RwLock::new(user_id),
        }
    }

    pub fn set_user(&self, user_id: impl Into<String>) {
        *self
            .user_id
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(user_id.into());
    }

    pub fn clear(&self) {
        *self
            .user_id
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

impl SessionProvider for UserSession {
    fn current_user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .filter(|u| !u.is_empty())
    }
}
