use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::metadata::TagReader;
use super::{ScanError, scan_folders};
use crate::jobs::CancelToken;
use crate::models::{FolderStat, LocalTrack};
use crate::store::atomic;

pub const SCAN_CACHE_VERSION: u32 = 1;

/// Result of the last folder scan, reused while nothing on disk changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCache {
    pub version: u32,
    /// Taken when the scan started.
    pub scanned_at: DateTime<Utc>,
    /// Sorted and deduplicated.
    pub folders: Vec<PathBuf>,
    pub tracks: Vec<LocalTrack>,
    pub folder_stats: Vec<FolderStat>,
}

pub fn folder_key(folders: &[PathBuf]) -> Vec<PathBuf> {
    let mut key = folders.to_vec();
    key.sort();
    key.dedup();
    key
}

impl ScanCache {
    /// The cache holds for `folders` when it was written by this version for
    /// the same folder set, every folder still exists, and no directory
    /// below them was modified after the scan started.
    pub fn is_valid_for(&self, folders: &[PathBuf]) -> bool {
        if self.version != SCAN_CACHE_VERSION {
            log::info!("Scan cache version {} is stale", self.version);
            return false;
        }
        if self.folders != folder_key(folders) {
            log::info!("Scan cache was built for different folders");
            return false;
        }
        for folder in &self.folders {
            if !folder.is_dir() {
                log::info!("Cached folder {} is gone", folder.display());
                return false;
            }
            if let Some(dir) = changed_dir(folder, self.scanned_at) {
                log::info!("{} changed since last scan", dir.display());
                return false;
            }
        }
        true
    }
}

/// First directory under `root` (inclusive) whose mtime is after `since`.
fn changed_dir(root: &Path, since: DateTime<Utc>) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .find(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|mtime| DateTime::<Utc>::from(mtime) > since)
                .unwrap_or(true)
        })
        .map(|e| e.into_path())
}

pub fn load(path: &Path) -> Option<ScanCache> {
    match atomic::read_json::<ScanCache>(path) {
        Ok(cache) => cache,
        Err(e) => {
            log::warn!("Discarding unreadable scan cache: {}", e);
            None
        }
    }
}

/// Return the cached scan for `folders` if still valid, otherwise scan and
/// rewrite the cache. `force` skips the validity check.
pub fn load_or_scan<F>(
    path: &Path,
    folders: &[PathBuf],
    tags: &dyn TagReader,
    cancel: &CancelToken,
    force: bool,
    on_file: F,
) -> Result<ScanCache, ScanError>
where
    F: FnMut(u64, u64, &Path),
{
    if !force {
        if let Some(cache) = load(path) {
            if cache.is_valid_for(folders) {
                log::info!("Using cached scan of {} tracks", cache.tracks.len());
                return Ok(cache);
            }
        }
    }

    let folders = folder_key(folders);
    let scanned_at = Utc::now();
    let result = scan_folders(&folders, tags, cancel, on_file)?;

    let cache = ScanCache {
        version: SCAN_CACHE_VERSION,
        scanned_at,
        folders,
        tracks: result.tracks,
        folder_stats: result.folder_stats,
    };
    if let Err(e) = atomic::write_json(path, &cache) {
        log::warn!("Could not write scan cache: {}", e);
    }
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::metadata::NoTags;
    use std::fs;
    use std::thread;
    use std::time::Duration;

    fn scan(cache_path: &Path, folders: &[PathBuf], force: bool) -> ScanCache {
        load_or_scan(cache_path, folders, &NoTags, &CancelToken::new(), force, |_, _, _| {}).unwrap()
    }

    #[test]
    fn test_cache_reused_until_folder_changes() {
        let music = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let sub = music.path().join("sets");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("A - B.mp3"), b"").unwrap();
        let cache_path = data.path().join("scan_cache.json");
        let folders = vec![music.path().to_path_buf()];

        thread::sleep(Duration::from_millis(20));
        let first = scan(&cache_path, &folders, false);
        assert_eq!(first.tracks.len(), 1);
        assert!(first.is_valid_for(&folders));

        let second = scan(&cache_path, &folders, false);
        assert_eq!(second.scanned_at, first.scanned_at);

        thread::sleep(Duration::from_millis(20));
        fs::write(sub.join("C - D.mp3"), b"").unwrap();
        assert!(!first.is_valid_for(&folders));

        let third = scan(&cache_path, &folders, false);
        assert_eq!(third.tracks.len(), 2);
    }

    #[test]
    fn test_different_folder_set_invalidates() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let cache_path = data.path().join("scan_cache.json");

        thread::sleep(Duration::from_millis(20));
        let cache = scan(&cache_path, &[a.path().to_path_buf()], false);
        assert!(!cache.is_valid_for(&[a.path().to_path_buf(), b.path().to_path_buf()]));
        // Order doesn't matter
        let both = scan(&cache_path, &[b.path().to_path_buf(), a.path().to_path_buf()], false);
        assert!(both.is_valid_for(&[a.path().to_path_buf(), b.path().to_path_buf()]));
    }

    #[test]
    fn test_version_mismatch_invalidates() {
        let music = tempfile::tempdir().unwrap();
        let folders = vec![music.path().to_path_buf()];
        let cache = ScanCache {
            version: SCAN_CACHE_VERSION + 1,
            scanned_at: Utc::now(),
            folders: folder_key(&folders),
            tracks: vec![],
            folder_stats: vec![],
        };
        assert!(!cache.is_valid_for(&folders));
    }

    #[test]
    fn test_force_rescans() {
        let music = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let cache_path = data.path().join("scan_cache.json");
        let folders = vec![music.path().to_path_buf()];

        thread::sleep(Duration::from_millis(20));
        let first = scan(&cache_path, &folders, false);
        thread::sleep(Duration::from_millis(5));
        let forced = scan(&cache_path, &folders, true);
        assert!(forced.scanned_at > first.scanned_at);
    }

    #[test]
    fn test_garbage_cache_is_rebuilt() {
        let music = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let cache_path = data.path().join("scan_cache.json");
        fs::write(&cache_path, "not json").unwrap();
        assert!(load(&cache_path).is_none());

        thread::sleep(Duration::from_millis(20));
        let cache = scan(&cache_path, &[music.path().to_path_buf()], false);
        assert!(load(&cache_path).is_some());
        assert!(cache.tracks.is_empty());
    }
}
