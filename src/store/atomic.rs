//! Crash-safe JSON document I/O.
//!
//! Writers serialize into a temp file next to the target, fsync it and
//! rename it over the target, so a reader only ever sees a complete old or
//! complete new document.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::StoreError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

/// Atomically replace `path` with the JSON serialization of `value`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let tmp = temp_path_for(path);
    let result = write_then_rename(&tmp, path, value);
    if result.is_err() {
        // Leave no stray temp file behind; the target is untouched.
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_then_rename<T: Serialize>(tmp: &Path, path: &Path, value: &T) -> Result<(), StoreError> {
    let file = File::create(tmp).map_err(|e| StoreError::io(tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| StoreError::json(tmp, e))?;
    writer.flush().map_err(|e| StoreError::io(tmp, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| StoreError::io(tmp, e.into_error()))?;
    file.sync_all().map_err(|e| StoreError::io(tmp, e))?;
    drop(file);

    fs::rename(tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Read a JSON document. A missing file is `Ok(None)`; a file that exists
/// but doesn't parse is an error so callers can decide how to recover.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Copy `path` to `backup` if it exists. The copy goes through a temp file
/// and a rename like [`write_json`], so `backup` is never half-written.
pub fn backup(path: &Path, backup: &Path) -> Result<bool, StoreError> {
    let tmp = temp_path_for(backup);
    let result = copy_then_rename(path, &tmp, backup);
    if !matches!(result, Ok(true)) {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn copy_then_rename(path: &Path, tmp: &Path, backup: &Path) -> Result<bool, StoreError> {
    match fs::copy(path, tmp) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StoreError::io(tmp, e)),
    }
    File::open(tmp)
        .and_then(|f| f.sync_all())
        .map_err(|e| StoreError::io(tmp, e))?;
    fs::rename(tmp, backup).map_err(|e| StoreError::io(backup, e))?;
    Ok(true)
}
