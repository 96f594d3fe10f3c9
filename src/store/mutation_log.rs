use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Where a star/unstar came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationSource {
    SingleStar,
    SingleUnstar,
    StarBatch,
    GlobalSearch,
    SingleSearch,
    Download,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub starred: bool,
    pub source: MutationSource,
}

/// Append-only JSON-lines audit trail of favorite changes. Written, never
/// read back into state.
pub struct MutationLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl MutationLog {
    pub fn new(path: &Path) -> Self {
        MutationLog {
            path: path.to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, key: &str, starred: bool, source: MutationSource) -> Result<(), StoreError> {
        let mutation = Mutation {
            timestamp: Utc::now(),
            key: key.to_string(),
            starred,
            source,
        };
        let mut line = serde_json::to_string(&mutation).map_err(|e| StoreError::json(&self.path, e))?;
        line.push('\n');

        let mut guard = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| StoreError::io(&self.path, e))?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes())
                .map_err(|e| StoreError::io(&self.path, e))?;
        }
        Ok(())
    }
}
