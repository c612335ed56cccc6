//! Quality tag vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;

/// Short label shown on a badge
///
/// The named variants are the full vocabulary the renderer has colors for.
/// `Unrecognized` only appears when a stored cache was written by a build
/// with a different vocabulary; it renders with the default color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QualityTag {
    Sd,
    Hd720,
    Hd1080,
    Uhd,
    Mp3,
    Flac,
    M4a,
    Opus,
    Aac,
    Ogg,
    Epub,
    Pdf,
    Mobi,
    Azw3,
    Cbz,
    Cbr,
    Djvu,
    Pdb,
    Fb2,
    Unrecognized(String),
}

impl QualityTag {
    /// Every tag in the known vocabulary
    pub const KNOWN: [QualityTag; 19] = [
        Self::Sd,
        Self::Hd720,
        Self::Hd1080,
        Self::Uhd,
        Self::Mp3,
        Self::Flac,
        Self::M4a,
        Self::Opus,
        Self::Aac,
        Self::Ogg,
        Self::Epub,
        Self::Pdf,
        Self::Mobi,
        Self::Azw3,
        Self::Cbz,
        Self::Cbr,
        Self::Djvu,
        Self::Pdb,
        Self::Fb2,
    ];

    /// Look up a label in the known vocabulary (exact, case-sensitive)
    pub fn known(label: &str) -> Option<Self> {
        Self::KNOWN.iter().find(|t| t.label() == label).cloned()
    }

    /// Look up an upper-cased codec, container or file extension
    pub fn from_format_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        Self::known(&upper).filter(|t| !t.is_resolution())
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Sd => "SD",
            Self::Hd720 => "720p",
            Self::Hd1080 => "1080p",
            Self::Uhd => "UHD",
            Self::Mp3 => "MP3",
            Self::Flac => "FLAC",
            Self::M4a => "M4A",
            Self::Opus => "OPUS",
            Self::Aac => "AAC",
            Self::Ogg => "OGG",
            Self::Epub => "EPUB",
            Self::Pdf => "PDF",
            Self::Mobi => "MOBI",
            Self::Azw3 => "AZW3",
            Self::Cbz => "CBZ",
            Self::Cbr => "CBR",
            Self::Djvu => "DJVU",
            Self::Pdb => "PDB",
            Self::Fb2 => "FB2",
            Self::Unrecognized(label) => label,
        }
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Sd | Self::Hd720 | Self::Hd1080 | Self::Uhd)
    }
}

impl fmt::Display for QualityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for QualityTag {
    fn from(label: String) -> Self {
        Self::known(&label).unwrap_or(Self::Unrecognized(label))
    }
}

impl From<QualityTag> for String {
    fn from(tag: QualityTag) -> Self {
        tag.label().to_string()
    }
}
