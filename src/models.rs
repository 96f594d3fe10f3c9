use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical;

/// A track from the fingerprint-recognition history: something the user
/// wants to own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedTrack {
    pub artist: String,
    pub title: String,
    /// When the track was recognized. Missing in some exports.
    #[serde(default)]
    pub tagged_at: Option<DateTime<Utc>>,
}

impl TaggedTrack {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            tagged_at: None,
        }
    }

    pub fn identity_key(&self) -> String {
        canonical::identity_key(&self.artist, &self.title)
    }

    pub fn status_key(&self) -> String {
        canonical::status_key(&self.artist, &self.title)
    }
}

/// A music file discovered on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTrack {
    pub artist: String,
    pub title: String,
    pub file_path: PathBuf,
    pub filename: String,
    /// True when artist/title came from embedded tags rather than the filename.
    pub from_tags: bool,
}

impl LocalTrack {
    /// A local track is alive as long as its file still exists.
    pub fn is_live(&self) -> bool {
        self.file_path.exists()
    }

    pub fn status_key(&self) -> String {
        canonical::status_key(&self.artist, &self.title)
    }
}

/// Per-folder scan statistics, shown alongside compare results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderStat {
    pub folder: PathBuf,
    pub files: u64,
    pub from_filename: u64,
    pub from_tags: u64,
    /// Audio files with neither a parseable name nor usable tags.
    pub unparsed: u64,
}
