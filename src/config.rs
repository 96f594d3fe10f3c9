use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::store::DEFAULT_MAX_OUTCOMES;

/// Environment variable that overrides `catalog.token`.
pub const TOKEN_ENV: &str = "TRACKSYNC_CATALOG_TOKEN";

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Folders holding the local music collection.
    pub music_dirs: Vec<PathBuf>,
    /// Where the JSON documents live (overrides XDG default).
    pub data_dir: Option<PathBuf>,
    /// Where downloads are written. Defaults to the first music dir.
    pub download_dir: Option<PathBuf>,
    /// Number of matching threads. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    pub catalog: CatalogConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            token: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Search outcomes kept in the log before the oldest are trimmed.
    pub max_outcomes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_outcomes: DEFAULT_MAX_OUTCOMES,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tracksync/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                log::debug!("Catalog token taken from {}", TOKEN_ENV);
                self.catalog.token = Some(token.trim().to_string());
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Explicit download dir, else `<first music dir>/downloads`, else
    /// `<data dir>/downloads`.
    pub fn resolve_download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        match self.music_dirs.first() {
            Some(dir) => dir.join("downloads"),
            None => self.resolve_data_dir().join("downloads"),
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default data directory using the XDG data directory.
pub fn default_data_dir() -> PathBuf {
    match ProjectDirs::from("", "", crate::APP_NAME) {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        // Fallback: current directory
        None => PathBuf::from(".tracksync"),
    }
}

/// Locations of the persisted documents inside the data dir.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub library: PathBuf,
    pub scan_cache: PathBuf,
    pub skip_list: PathBuf,
    pub status: PathBuf,
    pub mutation_log: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            library: data_dir.join("library.json"),
            scan_cache: data_dir.join("scan_cache.json"),
            skip_list: data_dir.join("skiplist.json"),
            status: data_dir.join("compare_status.json"),
            mutation_log: data_dir.join("mutations.jsonl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
music_dirs = ["/music/sets"]

[catalog]
base_url = "https://catalog.example/api"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.music_dirs, vec![PathBuf::from("/music/sets")]);
        assert_eq!(config.catalog.base_url, "https://catalog.example/api");
        assert_eq!(config.catalog.timeout_secs, 20);
        assert_eq!(config.store.max_outcomes, DEFAULT_MAX_OUTCOMES);
        assert_eq!(config.resolve_download_dir(), PathBuf::from("/music/sets/downloads"));
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "music_dirs = 7").unwrap();
        let config = AppConfig::load_from(&path);
        assert!(config.music_dirs.is_empty());
        assert_eq!(config.catalog.timeout_secs, 20);
    }

    #[test]
    fn test_data_paths() {
        let paths = DataPaths::new(Path::new("/data"));
        assert_eq!(paths.status, PathBuf::from("/data/compare_status.json"));
        assert_eq!(paths.mutation_log, PathBuf::from("/data/mutations.jsonl"));
    }

    #[test]
    fn test_resolve_workers() {
        let config = AppConfig {
            workers: 3,
            ..AppConfig::default()
        };
        assert_eq!(config.resolve_workers(), 3);
        assert!(AppConfig::default().resolve_workers() >= 1);
    }
}
