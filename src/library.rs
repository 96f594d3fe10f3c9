//! The fingerprint-history library: every track the user has tagged,
//! merged across imports.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TaggedTrack;
use crate::store::{StoreError, atomic};

pub const LIBRARY_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Anything that can hand over fingerprinted tracks.
pub trait FingerprintSource {
    fn tracks(&mut self) -> Result<Vec<TaggedTrack>, LibraryError>;
}

/// A JSON export: an array of `{artist, title, tagged_at?}`.
pub struct JsonExportSource {
    path: PathBuf,
}

impl JsonExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FingerprintSource for JsonExportSource {
    fn tracks(&mut self) -> Result<Vec<TaggedTrack>, LibraryError> {
        let file = File::open(&self.path).map_err(|source| LibraryError::Read {
            path: self.path.clone(),
            source,
        })?;
        let tracks: Vec<TaggedTrack> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| LibraryError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(tracks
            .into_iter()
            .filter(|t| !t.artist.trim().is_empty() && !t.title.trim().is_empty())
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryCache {
    pub version: u32,
    pub tracks: Vec<TaggedTrack>,
}

impl Default for LibraryCache {
    fn default() -> Self {
        LibraryCache {
            version: LIBRARY_VERSION,
            tracks: Vec::new(),
        }
    }
}

/// Counts from one merge.
#[derive(Debug, Default, PartialEq)]
pub struct MergeResult {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl LibraryCache {
    pub fn load(path: &Path) -> Self {
        match atomic::read_json::<LibraryCache>(path) {
            Ok(Some(cache)) if cache.version == LIBRARY_VERSION => cache,
            Ok(Some(cache)) => {
                log::warn!("Library cache version {} unsupported, rebuilding", cache.version);
                LibraryCache::default()
            }
            Ok(None) => LibraryCache::default(),
            Err(e) => {
                log::warn!("Library cache unreadable, rebuilding: {}", e);
                LibraryCache::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), LibraryError> {
        atomic::write_json(path, self)?;
        Ok(())
    }

    /// Merge `incoming` by identity key. When both sides hold the same
    /// track the one with the newer `tagged_at` wins; a dated entry beats
    /// an undated one.
    pub fn merge(&mut self, incoming: Vec<TaggedTrack>) -> MergeResult {
        let mut result = MergeResult::default();
        let mut by_key: HashMap<String, usize> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.identity_key(), i))
            .collect();

        for track in incoming {
            let key = track.identity_key();
            match by_key.get(&key) {
                Some(&i) => {
                    if track.tagged_at > self.tracks[i].tagged_at {
                        self.tracks[i] = track;
                        result.updated += 1;
                    } else {
                        result.unchanged += 1;
                    }
                }
                None => {
                    by_key.insert(key, self.tracks.len());
                    self.tracks.push(track);
                    result.added += 1;
                }
            }
        }

        log::info!(
            "Library merge: {} added, {} updated, {} unchanged ({} total)",
            result.added,
            result.updated,
            result.unchanged,
            self.tracks.len()
        );
        result
    }
}

/// Pull every track from `source` into the cache at `path`.
pub fn import(path: &Path, source: &mut dyn FingerprintSource) -> Result<MergeResult, LibraryError> {
    let incoming = source.tracks()?;
    let mut cache = LibraryCache::load(path);
    let result = cache.merge(incoming);
    cache.save(path)?;
    Ok(result)
}
