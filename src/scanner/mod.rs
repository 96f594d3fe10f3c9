pub mod cache;
pub mod filename;
pub mod metadata;

use crate::SUPPORTED_EXTENSIONS;
use crate::jobs::CancelToken;
use crate::models::{FolderStat, LocalTrack};
use metadata::TagReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Music folder not found: {0}")]
    MissingFolder(PathBuf),
    #[error("Scan cancelled")]
    Cancelled,
}

pub struct ScanResult {
    pub tracks: Vec<LocalTrack>,
    pub folder_stats: Vec<FolderStat>,
    pub scanned: u64,
    pub unparsed: u64,
}

/// Collect the audio files below `folder`, sorted for deterministic order.
fn audio_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Skipping unreadable entry under {}: {}", folder.display(), err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_audio_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

pub fn is_audio_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Scan folders for audio files and derive an artist/title for each.
///
/// The file name is parsed first; tags are read only when the name yields
/// nothing. `on_file` is called after every file with (done, total, path).
/// The cancel token is checked between files.
pub fn scan_folders<F>(
    folders: &[PathBuf],
    tags: &dyn TagReader,
    cancel: &CancelToken,
    mut on_file: F,
) -> Result<ScanResult, ScanError>
where
    F: FnMut(u64, u64, &Path),
{
    for folder in folders {
        if !folder.is_dir() {
            return Err(ScanError::MissingFolder(folder.clone()));
        }
    }

    // First pass: collect all audio file paths
    let per_folder: Vec<(&PathBuf, Vec<PathBuf>)> =
        folders.iter().map(|f| (f, audio_files(f))).collect();
    let total: u64 = per_folder.iter().map(|(_, files)| files.len() as u64).sum();

    let mut result = ScanResult {
        tracks: Vec::with_capacity(total as usize),
        folder_stats: Vec::with_capacity(folders.len()),
        scanned: 0,
        unparsed: 0,
    };

    for (folder, files) in per_folder {
        let mut stat = FolderStat {
            folder: folder.clone(),
            ..FolderStat::default()
        };

        for path in files {
            if cancel.is_cancelled() {
                log::info!("Scan cancelled after {} of {} files", result.scanned, total);
                return Err(ScanError::Cancelled);
            }

            stat.files += 1;
            result.scanned += 1;

            match identify(&path, tags) {
                Some(track) => {
                    if track.from_tags {
                        stat.from_tags += 1;
                    } else {
                        stat.from_filename += 1;
                    }
                    result.tracks.push(track);
                }
                None => {
                    log::debug!("No artist/title for {}", path.display());
                    stat.unparsed += 1;
                    result.unparsed += 1;
                }
            }

            on_file(result.scanned, total, &path);
        }

        result.folder_stats.push(stat);
    }

    log::info!(
        "Scanned {} files in {} folders: {} identified, {} unparsed",
        result.scanned,
        folders.len(),
        result.tracks.len(),
        result.unparsed
    );

    Ok(result)
}

/// Build a LocalTrack from the file name, falling back to tags.
fn identify(path: &Path, tags: &dyn TagReader) -> Option<LocalTrack> {
    let filename = path.file_name()?.to_string_lossy().to_string();

    if let Some(parsed) = filename::parse_filename(path) {
        return Some(LocalTrack {
            artist: parsed.artist,
            title: parsed.title,
            file_path: path.to_path_buf(),
            filename,
            from_tags: false,
        });
    }

    tags.read(path).map(|tag| LocalTrack {
        artist: tag.artist,
        title: tag.title,
        file_path: path.to_path_buf(),
        filename,
        from_tags: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::{NoTags, TagIdentity};
    use std::fs;

    struct FixedTags;

    impl TagReader for FixedTags {
        fn read(&self, _path: &Path) -> Option<TagIdentity> {
            Some(TagIdentity {
                artist: "Tagged Artist".to_string(),
                title: "Tagged Title".to_string(),
            })
        }
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_scan_filename_then_tags() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Nova Nova - Prisoner Song.mp3");
        touch(dir.path(), "track01.flac");
        touch(dir.path(), "cover.jpg");

        let result = scan_folders(
            &[dir.path().to_path_buf()],
            &FixedTags,
            &CancelToken::new(),
            |_, _, _| {},
        )
        .unwrap();

        assert_eq!(result.scanned, 2);
        assert_eq!(result.tracks.len(), 2);
        let by_name: Vec<_> = result.tracks.iter().map(|t| (t.filename.as_str(), t.from_tags)).collect();
        assert!(by_name.contains(&("Nova Nova - Prisoner Song.mp3", false)));
        assert!(by_name.contains(&("track01.flac", true)));

        let stat = &result.folder_stats[0];
        assert_eq!(stat.files, 2);
        assert_eq!(stat.from_filename, 1);
        assert_eq!(stat.from_tags, 1);
        assert_eq!(stat.unparsed, 0);
    }

    #[test]
    fn test_scan_counts_unparsed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "track01.flac");

        let result = scan_folders(&[dir.path().to_path_buf()], &NoTags, &CancelToken::new(), |_, _, _| {})
            .unwrap();
        assert!(result.tracks.is_empty());
        assert_eq!(result.unparsed, 1);
        assert_eq!(result.folder_stats[0].unparsed, 1);
    }

    #[test]
    fn test_scan_walks_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("2024").join("March");
        fs::create_dir_all(&sub).unwrap();
        touch(&sub, "A - B.wav");

        let mut calls = 0;
        let result = scan_folders(&[dir.path().to_path_buf()], &NoTags, &CancelToken::new(), |done, total, _| {
            calls += 1;
            assert!(done <= total);
        })
        .unwrap();
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_scan_missing_folder() {
        let result = scan_folders(
            &[PathBuf::from("/definitely/not/here")],
            &NoTags,
            &CancelToken::new(),
            |_, _, _| {},
        );
        assert!(matches!(result, Err(ScanError::MissingFolder(_))));
    }

    #[test]
    fn test_scan_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A - B.mp3");
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = scan_folders(&[dir.path().to_path_buf()], &NoTags, &cancel, |_, _, _| {});
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}
