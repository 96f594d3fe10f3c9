//! Remote catalog: search, favorite and download tracks that are missing
//! locally.

pub mod http;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::index::ReconciliationIndex;
use crate::matcher::match_track;
use crate::models::{LocalTrack, TaggedTrack};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Catalog session expired, log in again")]
    AuthExpired,
    #[error("No download credits left")]
    NoCredits,
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("Unexpected response: {0}")]
    Malformed(String),
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CatalogError {
    /// Errors that end a whole batch instead of failing one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::AuthExpired | CatalogError::NoCredits)
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogHit {
    pub id: String,
    /// "Artist - Title"
    pub display_text: String,
    pub url: String,
    #[serde(default)]
    pub favorited: bool,
}

impl CatalogHit {
    /// Split the display text on its first " - ".
    pub fn artist_title(&self) -> Option<(String, String)> {
        let (artist, title) = self.display_text.split_once(" - ")?;
        let (artist, title) = (artist.trim(), title.trim());
        if artist.is_empty() || title.is_empty() {
            return None;
        }
        Some((artist.to_string(), title.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadLink {
    File(String),
    NoCredits,
}

pub trait RemoteCatalog: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<CatalogHit>, CatalogError>;

    fn set_favorite(&self, id: &str, favorite: bool) -> Result<(), CatalogError>;

    /// Resolve a track page url into a downloadable file url.
    fn fetch_download_url(&self, track_url: &str) -> Result<DownloadLink, CatalogError>;

    /// Download to `dest`, returning the number of bytes written. `dest`
    /// only appears once the transfer completed.
    fn download_file(&self, file_url: &str, dest: &Path) -> Result<u64, CatalogError>;
}

pub fn search_query(track: &TaggedTrack) -> String {
    format!("{} {}", track.artist.trim(), track.title.trim())
}

/// Pick the search hit that is the same song as `track`, using the local
/// matcher. Returns the hit and its match score.
pub fn best_catalog_hit<'a>(track: &TaggedTrack, hits: &'a [CatalogHit]) -> Option<(&'a CatalogHit, f64)> {
    let mut positions = Vec::with_capacity(hits.len());
    let corpus: Vec<LocalTrack> = hits
        .iter()
        .enumerate()
        .filter_map(|(i, hit)| {
            let (artist, title) = hit.artist_title()?;
            positions.push(i);
            Some(LocalTrack {
                artist,
                title,
                file_path: PathBuf::from(&hit.url),
                filename: hit.display_text.clone(),
                from_tags: false,
            })
        })
        .collect();

    let index = ReconciliationIndex::build(corpus);
    let result = match_track(track, &index);
    let i = result.index?;
    Some((&hits[positions[i]], result.score))
}
