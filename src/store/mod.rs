pub mod atomic;
pub mod mutation_log;
pub mod replay;
pub mod skiplist;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{FolderStat, LocalTrack, TaggedTrack};

pub const STATUS_VERSION: u32 = 1;
pub const DEFAULT_MAX_OUTCOMES: usize = 20_000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A fingerprinted track that has no local copy yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTrack {
    pub artist: String,
    pub title: String,
    pub key: String,
    #[serde(default)]
    pub tagged_at: Option<DateTime<Utc>>,
}

impl From<&TaggedTrack> for StatusTrack {
    fn from(track: &TaggedTrack) -> Self {
        StatusTrack {
            artist: track.artist.clone(),
            title: track.title.clone(),
            key: track.status_key(),
            tagged_at: track.tagged_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaveLocallyEntry {
    pub artist: String,
    pub title: String,
    pub key: String,
    pub local: LocalTrack,
    pub score: f64,
}

/// Result of one search against the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outcome {
    Found { url: String },
    NotFound,
}

impl Outcome {
    fn action(&self) -> &'static str {
        match self {
            Outcome::Found { .. } => "found",
            Outcome::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// The persisted compare document.
///
/// `urls` and `not_found` are derived from `search_outcomes` on every save
/// and should not be edited directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareStatus {
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub to_download: Vec<StatusTrack>,
    pub have_locally: Vec<HaveLocallyEntry>,
    pub skipped_tracks: Vec<StatusTrack>,
    pub folder_stats: Vec<FolderStat>,
    pub urls: BTreeMap<String, String>,
    pub starred: BTreeMap<String, bool>,
    pub not_found: BTreeMap<String, bool>,
    pub track_ids: BTreeMap<String, String>,
    pub search_outcomes: Vec<OutcomeEntry>,
}

impl Default for CompareStatus {
    fn default() -> Self {
        CompareStatus {
            version: STATUS_VERSION,
            updated_at: None,
            to_download: Vec::new(),
            have_locally: Vec::new(),
            skipped_tracks: Vec::new(),
            folder_stats: Vec::new(),
            urls: BTreeMap::new(),
            starred: BTreeMap::new(),
            not_found: BTreeMap::new(),
            track_ids: BTreeMap::new(),
            search_outcomes: Vec::new(),
        }
    }
}

/// Look a key up case-preserved first, then lowercased.
fn lookup<'a, V>(map: &'a BTreeMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key).or_else(|| map.get(&key.to_lowercase()))
}

fn same_key(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl CompareStatus {
    fn has_lists(&self) -> bool {
        !self.to_download.is_empty() || !self.have_locally.is_empty() || !self.skipped_tracks.is_empty()
    }

    /// Sort and cap the outcome log, then rederive `urls` / `not_found`.
    pub fn materialize(&mut self, max_outcomes: usize) {
        replay::sort_log(&mut self.search_outcomes);
        if self.search_outcomes.len() > max_outcomes {
            let excess = self.search_outcomes.len() - max_outcomes;
            self.search_outcomes.drain(..excess);
            log::debug!("Trimmed {} oldest search outcomes", excess);
        }
        replay::replay(&self.search_outcomes, &mut self.urls, &mut self.not_found);
    }

    /// Append to the outcome log. Takes effect on the next materialize.
    pub fn push_outcome(&mut self, key: &str, outcome: Outcome) {
        log::debug!("Outcome {} for {}", outcome.action(), key);
        self.search_outcomes.push(OutcomeEntry {
            timestamp: Utc::now(),
            key: key.to_string(),
            outcome,
        });
    }

    pub fn mark_starred(&mut self, key: &str, starred: bool) {
        self.starred.insert(key.to_string(), starred);
        self.starred.insert(key.to_lowercase(), starred);
    }

    pub fn remember_track_id(&mut self, key: &str, id: &str) {
        self.track_ids.insert(key.to_string(), id.to_string());
        self.track_ids.insert(key.to_lowercase(), id.to_string());
    }

    pub fn url_for(&self, key: &str) -> Option<&str> {
        lookup(&self.urls, key).map(String::as_str)
    }

    pub fn is_not_found(&self, key: &str) -> bool {
        lookup(&self.not_found, key).copied().unwrap_or(false)
    }

    pub fn is_starred(&self, key: &str) -> bool {
        lookup(&self.starred, key).copied().unwrap_or(false)
    }

    pub fn track_id(&self, key: &str) -> Option<&str> {
        lookup(&self.track_ids, key).map(String::as_str)
    }

    pub fn summary(&self) -> StatusSummary {
        let found = self
            .to_download
            .iter()
            .filter(|t| self.url_for(&t.key).is_some())
            .count();
        let not_found = self
            .to_download
            .iter()
            .filter(|t| self.url_for(&t.key).is_none() && self.is_not_found(&t.key))
            .count();
        let starred = self.to_download.iter().filter(|t| self.is_starred(&t.key)).count();
        StatusSummary {
            to_download: self.to_download.len(),
            have_locally: self.have_locally.len(),
            skipped: self.skipped_tracks.len(),
            found,
            not_found,
            starred,
            outcomes: self.search_outcomes.len(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub to_download: usize,
    pub have_locally: usize,
    pub skipped: usize,
    pub found: usize,
    pub not_found: usize,
    pub starred: usize,
    pub outcomes: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Durable holder of the CompareStatus document.
///
/// Every mutation goes through [`StatusStore::update`], which rederives the
/// replayed maps and writes the document before releasing the lock.
pub struct StatusStore {
    path: Option<PathBuf>,
    max_outcomes: usize,
    inner: Mutex<CompareStatus>,
}

impl StatusStore {
    /// Load the document at `path`, recovering from the `.bak` copy when
    /// the primary is unreadable. Never fails; the worst case is an empty
    /// document.
    pub fn open(path: &Path, max_outcomes: usize) -> Self {
        let mut status = load(path);
        status.materialize(max_outcomes);
        StatusStore {
            path: Some(path.to_path_buf()),
            max_outcomes,
            inner: Mutex::new(status),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory(max_outcomes: usize) -> Self {
        StatusStore {
            path: None,
            max_outcomes,
            inner: Mutex::new(CompareStatus::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, CompareStatus> {
        // A panicking job must not take the store down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> CompareStatus {
        self.lock().clone()
    }

    /// Apply `f` to the document, then materialize and persist it.
    ///
    /// Outcomes another process appended to the file since this store last
    /// wrote it are merged in first, so concurrent writers keep each
    /// other's log entries.
    pub fn update<R>(&self, f: impl FnOnce(&mut CompareStatus) -> R) -> Result<R, StoreError> {
        let mut status = self.lock();
        let result = f(&mut status);
        if let Some(path) = &self.path {
            merge_on_disk_log(path, &mut status);
        }
        status.materialize(self.max_outcomes);
        status.updated_at = Some(Utc::now());
        if let Some(path) = &self.path {
            persist(path, &status)?;
        }
        Ok(result)
    }

    pub fn record_outcome(&self, key: &str, outcome: Outcome) -> Result<(), StoreError> {
        self.update(|s| s.push_outcome(key, outcome))
    }

    pub fn set_starred(&self, key: &str, starred: bool) -> Result<(), StoreError> {
        self.update(|s| s.mark_starred(key, starred))
    }

    pub fn set_track_id(&self, key: &str, id: &str) -> Result<(), StoreError> {
        self.update(|s| s.remember_track_id(key, id))
    }

    /// Replace the three track lists after a full compare.
    pub fn replace_lists(
        &self,
        to_download: Vec<StatusTrack>,
        have_locally: Vec<HaveLocallyEntry>,
        skipped_tracks: Vec<StatusTrack>,
        folder_stats: Vec<FolderStat>,
    ) -> Result<(), StoreError> {
        self.update(|s| {
            s.to_download = to_download;
            s.have_locally = have_locally;
            s.skipped_tracks = skipped_tracks;
            s.folder_stats = folder_stats;
        })
    }

    /// Move a track from to_download into skipped_tracks.
    pub fn skip_track(&self, key: &str) -> Result<bool, StoreError> {
        self.update(|s| match s.to_download.iter().position(|t| same_key(&t.key, key)) {
            Some(pos) => {
                let track = s.to_download.remove(pos);
                s.skipped_tracks.push(track);
                true
            }
            None => false,
        })
    }

    /// Move a track from skipped_tracks back into to_download.
    pub fn unskip_track(&self, key: &str) -> Result<bool, StoreError> {
        self.update(|s| match s.skipped_tracks.iter().position(|t| same_key(&t.key, key)) {
            Some(pos) => {
                let track = s.skipped_tracks.remove(pos);
                s.to_download.push(track);
                true
            }
            None => false,
        })
    }

    /// Drop a track from to_download until the next full compare.
    pub fn dismiss(&self, key: &str) -> Result<bool, StoreError> {
        self.update(|s| {
            let before = s.to_download.len();
            s.to_download.retain(|t| !same_key(&t.key, key));
            s.to_download.len() != before
        })
    }

    /// Record a finished download: the track leaves to_download and joins
    /// have_locally with the downloaded file.
    pub fn mark_downloaded(&self, key: &str, local: LocalTrack) -> Result<(), StoreError> {
        self.update(|s| {
            let (artist, title) = match s.to_download.iter().position(|t| same_key(&t.key, key)) {
                Some(pos) => {
                    let t = s.to_download.remove(pos);
                    (t.artist, t.title)
                }
                None => (local.artist.clone(), local.title.clone()),
            };
            s.have_locally.retain(|h| !same_key(&h.key, key));
            s.have_locally.push(HaveLocallyEntry {
                artist,
                title,
                key: key.to_string(),
                local,
                score: 1.0,
            });
        })
    }
}

fn load(path: &Path) -> CompareStatus {
    let bak = backup_path(path);
    let primary = match atomic::read_json::<CompareStatus>(path) {
        Ok(Some(status)) => status,
        Ok(None) => return CompareStatus::default(),
        Err(e) => {
            log::warn!("Status file unreadable ({}), trying backup", e);
            return match atomic::read_json::<CompareStatus>(&bak) {
                Ok(Some(status)) => status,
                Ok(None) => CompareStatus::default(),
                Err(e) => {
                    log::warn!("Backup also unreadable ({}), starting empty", e);
                    CompareStatus::default()
                }
            };
        }
    };

    if primary.has_lists() && primary.search_outcomes.is_empty() {
        return recover_log(primary, &bak);
    }
    primary
}

/// A primary that lost its log (written by an older build or truncated by
/// hand) gets the backup's log merged back in.
fn recover_log(mut primary: CompareStatus, bak: &Path) -> CompareStatus {
    let backup = match atomic::read_json::<CompareStatus>(bak) {
        Ok(Some(b)) => b,
        Ok(None) => return primary,
        Err(e) => {
            log::warn!("Backup unreadable during log recovery: {}", e);
            return primary;
        }
    };
    if backup.search_outcomes.is_empty() {
        return primary;
    }

    let added = merge_outcomes(&mut primary.search_outcomes, backup.search_outcomes);
    log::warn!("Recovered {} search outcomes from {}", added, bak.display());
    primary
}

type OutcomeId = (DateTime<Utc>, String, &'static str);

fn outcome_id(entry: &OutcomeEntry) -> OutcomeId {
    (entry.timestamp, entry.key.clone(), entry.outcome.action())
}

/// Append the entries of `other` that `log` doesn't already hold, keyed by
/// (timestamp, key, action). Returns how many were added.
fn merge_outcomes(log: &mut Vec<OutcomeEntry>, other: Vec<OutcomeEntry>) -> usize {
    let mut seen: HashSet<OutcomeId> = log.iter().map(outcome_id).collect();
    let before = log.len();
    for entry in other {
        if seen.insert(outcome_id(&entry)) {
            log.push(entry);
        }
    }
    log.len() - before
}

/// Pull in outcomes written to `path` by another store. An unreadable file
/// is left to `persist` to replace.
fn merge_on_disk_log(path: &Path, status: &mut CompareStatus) {
    match atomic::read_json::<CompareStatus>(path) {
        Ok(Some(on_disk)) => {
            let added = merge_outcomes(&mut status.search_outcomes, on_disk.search_outcomes);
            if added > 0 {
                log::debug!("Merged {} search outcomes written by another process", added);
            }
        }
        Ok(None) => {}
        Err(e) => log::warn!("Skipping merge with unreadable status file: {}", e),
    }
}

fn persist(path: &Path, status: &CompareStatus) -> Result<(), StoreError> {
    atomic::backup(path, &backup_path(path))?;
    atomic::write_json(path, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn track(artist: &str, title: &str) -> StatusTrack {
        StatusTrack::from(&TaggedTrack::new(artist, title))
    }

    #[test]
    fn test_outcome_wire_format() {
        let entry = OutcomeEntry {
            timestamp: "2024-05-01T10:00:00Z".parse().unwrap(),
            key: "X - Y".to_string(),
            outcome: Outcome::Found { url: "a".to_string() },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "found");
        assert_eq!(json["url"], "a");
        assert_eq!(json["key"], "X - Y");

        let nf: OutcomeEntry = serde_json::from_str(
            r#"{"timestamp":"2024-05-01T10:00:00Z","key":"X - Y","action":"not_found"}"#,
        )
        .unwrap();
        assert_eq!(nf.outcome, Outcome::NotFound);
    }

    #[test]
    fn test_record_outcome_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compare_status.json");

        let store = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES);
        store
            .record_outcome("X - Y", Outcome::Found { url: "a".into() })
            .unwrap();
        store.record_outcome("X - Y", Outcome::NotFound).unwrap();

        let reopened = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES);
        let status = reopened.snapshot();
        assert_eq!(status.url_for("X - Y"), Some("a"));
        assert_eq!(status.url_for("x - y"), Some("a"));
        assert!(!status.is_not_found("X - Y"));
        assert_eq!(status.search_outcomes.len(), 2);
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compare_status.json");

        let store = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES);
        store
            .record_outcome("A - B", Outcome::Found { url: "u".into() })
            .unwrap();
        // Second write backs up the first
        store.set_starred("A - B", true).unwrap();

        fs::write(&path, "{\"version\": 1, \"to_download\": [").unwrap();
        let status = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES).snapshot();
        assert_eq!(status.url_for("A - B"), Some("u"));
    }

    #[test]
    fn test_corrupt_everything_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compare_status.json");
        fs::write(&path, "garbage").unwrap();
        fs::write(backup_path(&path), "more garbage").unwrap();
        let status = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES).snapshot();
        assert_eq!(status, CompareStatus::default());
    }

    #[test]
    fn test_missing_log_recovered_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compare_status.json");

        let mut with_log = CompareStatus::default();
        with_log.to_download.push(track("X", "Y"));
        with_log.search_outcomes.push(OutcomeEntry {
            timestamp: Utc::now(),
            key: "X - Y".into(),
            outcome: Outcome::Found { url: "a".into() },
        });
        atomic::write_json(&backup_path(&path), &with_log).unwrap();

        let mut without_log = with_log.clone();
        without_log.search_outcomes.clear();
        without_log.urls.clear();
        atomic::write_json(&path, &without_log).unwrap();

        let status = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES).snapshot();
        assert_eq!(status.search_outcomes.len(), 1);
        assert_eq!(status.url_for("X - Y"), Some("a"));
    }

    #[test]
    fn test_materialize_rederives_logged_keys() {
        let mut status = CompareStatus::default();
        status.urls.insert("X - Y".into(), "stale".into());
        status.search_outcomes.push(OutcomeEntry {
            timestamp: Utc::now(),
            key: "X - Y".into(),
            outcome: Outcome::NotFound,
        });
        status.materialize(DEFAULT_MAX_OUTCOMES);
        assert_eq!(status.url_for("X - Y"), None);
        assert!(status.is_not_found("x - y"));
    }

    #[test]
    fn test_two_stores_on_one_file_keep_both_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compare_status.json");

        let a = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES);
        let b = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES);
        a.record_outcome("A - 1", Outcome::Found { url: "a".into() }).unwrap();
        b.record_outcome("B - 2", Outcome::Found { url: "b".into() }).unwrap();

        let status = StatusStore::open(&path, DEFAULT_MAX_OUTCOMES).snapshot();
        let mut keys: Vec<&str> = status.search_outcomes.iter().map(|e| e.key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["A - 1", "B - 2"]);
        assert_eq!(status.url_for("A - 1"), Some("a"));
        assert_eq!(status.url_for("B - 2"), Some("b"));
        // The merged entry is in memory too and survives the next write
        b.set_starred("B - 2", true).unwrap();
        assert_eq!(b.snapshot().url_for("A - 1"), Some("a"));
    }

    #[test]
    fn test_log_is_capped() {
        let store = StatusStore::in_memory(3);
        for i in 0..5 {
            store
                .record_outcome(&format!("A - {i}"), Outcome::Found { url: format!("u{i}") })
                .unwrap();
        }
        let status = store.snapshot();
        assert_eq!(status.search_outcomes.len(), 3);
        assert_eq!(status.search_outcomes[0].key, "A - 2");
        // Trimmed keys keep their derived url
        assert_eq!(status.url_for("A - 0"), Some("u0"));
    }

    #[test]
    fn test_skip_unskip_dismiss() {
        let store = StatusStore::in_memory(DEFAULT_MAX_OUTCOMES);
        store
            .replace_lists(vec![track("A", "B"), track("C", "D")], vec![], vec![], vec![])
            .unwrap();

        assert!(store.skip_track("a - b").unwrap());
        let s = store.snapshot();
        assert_eq!(s.to_download.len(), 1);
        assert_eq!(s.skipped_tracks[0].key, "A - B");

        assert!(store.unskip_track("A - B").unwrap());
        assert_eq!(store.snapshot().to_download.len(), 2);

        assert!(store.dismiss("C - D").unwrap());
        assert!(!store.dismiss("C - D").unwrap());
        let s = store.snapshot();
        assert_eq!(s.to_download.len(), 1);
        assert!(s.skipped_tracks.is_empty());
    }

    #[test]
    fn test_mark_downloaded_moves_track() {
        let store = StatusStore::in_memory(DEFAULT_MAX_OUTCOMES);
        store.replace_lists(vec![track("A", "B")], vec![], vec![], vec![]).unwrap();
        let local = LocalTrack {
            artist: "A".into(),
            title: "B".into(),
            file_path: PathBuf::from("/music/A - B.mp3"),
            filename: "A - B.mp3".into(),
            from_tags: false,
        };
        store.mark_downloaded("A - B", local).unwrap();
        let s = store.snapshot();
        assert!(s.to_download.is_empty());
        assert_eq!(s.have_locally.len(), 1);
        assert_eq!(s.have_locally[0].key, "A - B");
    }

    #[test]
    fn test_summary() {
        let store = StatusStore::in_memory(DEFAULT_MAX_OUTCOMES);
        store
            .replace_lists(
                vec![track("A", "B"), track("C", "D"), track("E", "F")],
                vec![],
                vec![track("G", "H")],
                vec![],
            )
            .unwrap();
        store.record_outcome("A - B", Outcome::Found { url: "u".into() }).unwrap();
        store.record_outcome("C - D", Outcome::NotFound).unwrap();
        store.set_starred("A - B", true).unwrap();

        let summary = store.snapshot().summary();
        assert_eq!(summary.to_download, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.found, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.starred, 1);
        assert_eq!(summary.outcomes, 2);
    }
}
