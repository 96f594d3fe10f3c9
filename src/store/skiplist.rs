use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{CompareStatus, StoreError, atomic};

pub const SKIPLIST_VERSION: u32 = 1;

/// Tracks the user never wants offered for download. Stored apart from the
/// compare document so a full compare can't wipe it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipList {
    pub version: u32,
    keys: BTreeSet<String>,
}

impl Default for SkipList {
    fn default() -> Self {
        SkipList {
            version: SKIPLIST_VERSION,
            keys: BTreeSet::new(),
        }
    }
}

impl SkipList {
    /// Load from disk; a missing or malformed file is an empty list.
    pub fn load(path: &Path) -> Self {
        match atomic::read_json::<SkipList>(path) {
            Ok(Some(list)) if list.version == SKIPLIST_VERSION => list,
            Ok(Some(list)) => {
                log::warn!(
                    "Skip list version {} unsupported, starting empty",
                    list.version
                );
                SkipList::default()
            }
            Ok(None) => SkipList::default(),
            Err(e) => {
                log::warn!("Skip list unreadable, starting empty: {}", e);
                SkipList::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        atomic::write_json(path, self)
    }

    pub fn add(&mut self, key: &str) -> bool {
        self.keys.insert(key.to_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.keys.remove(&key.to_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Read-time view: skip-listed to_download entries are shown as
    /// skipped. The stored document is not modified.
    pub fn apply(&self, status: &mut CompareStatus) {
        if self.keys.is_empty() {
            return;
        }
        let (skipped, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut status.to_download)
            .into_iter()
            .partition(|t| self.contains(&t.key));
        status.to_download = keep;
        for track in skipped {
            if !status.skipped_tracks.iter().any(|s| s.key.eq_ignore_ascii_case(&track.key)) {
                status.skipped_tracks.push(track);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaggedTrack;
    use crate::store::StatusTrack;

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut list = SkipList::default();
        assert!(list.add("Artist - Title"));
        assert!(!list.add("ARTIST - TITLE"));
        assert!(list.contains("artist - title"));
        assert!(list.remove("Artist - TITLE"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiplist.json");
        let mut list = SkipList::default();
        list.add("A - B");
        list.save(&path).unwrap();

        let loaded = SkipList::load(&path);
        assert!(loaded.contains("A - B"));
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiplist.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(SkipList::load(&path).is_empty());
    }

    #[test]
    fn test_apply_moves_to_skipped() {
        let mut status = CompareStatus::default();
        status.to_download = vec![
            StatusTrack::from(&TaggedTrack::new("A", "B")),
            StatusTrack::from(&TaggedTrack::new("C", "D")),
        ];
        let mut list = SkipList::default();
        list.add("c - d");

        list.apply(&mut status);
        assert_eq!(status.to_download.len(), 1);
        assert_eq!(status.to_download[0].key, "A - B");
        assert_eq!(status.skipped_tracks[0].key, "C - D");
    }
}
