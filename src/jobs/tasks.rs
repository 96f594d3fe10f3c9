//! Job bodies. Each returns a one-line summary on success.

use std::path::PathBuf;

use super::progress::ProgressHandle;
use super::{CancelToken, JobClass, JobContext, JobError, JobQueueEntry, Work};
use crate::catalog::{CatalogError, DownloadLink, best_catalog_hit, search_query};
use crate::compare::compare_tracks;
use crate::library::LibraryCache;
use crate::matcher::index::ReconciliationIndex;
use crate::models::{LocalTrack, TaggedTrack};
use crate::scanner::{ScanError, cache};
use crate::store::mutation_log::MutationSource;
use crate::store::skiplist::SkipList;
use crate::store::{Outcome, StatusTrack};

pub(super) fn run(
    ctx: &JobContext,
    work: &Work,
    cancel: &CancelToken,
    progress: &ProgressHandle,
) -> Result<String, JobError> {
    match work {
        Work::Compare { rescan } => compare(ctx, *rescan, cancel, progress),
        Work::GlobalSearch => global_search(ctx, cancel, progress),
        Work::StarBatch => star_batch(ctx, cancel, progress),
        Work::Item(class, entry) => {
            progress.set_current(&entry.key);
            let summary = match class {
                JobClass::SingleStar => set_favorite(ctx, entry, true, MutationSource::SingleStar),
                JobClass::SingleUnstar => set_favorite(ctx, entry, false, MutationSource::SingleUnstar),
                JobClass::SingleSearch => single_search(ctx, entry),
                JobClass::Download => download(ctx, entry),
                other => Err(JobError::NotQueued(*other)),
            }?;
            progress.advance();
            Ok(summary)
        }
    }
}

fn compare(
    ctx: &JobContext,
    rescan: bool,
    cancel: &CancelToken,
    progress: &ProgressHandle,
) -> Result<String, JobError> {
    if ctx.music_dirs.is_empty() {
        return Err(JobError::NoMusicDirs);
    }

    progress.start(0, if rescan { "Rescanning folders" } else { "Scanning folders" });
    let scan = cache::load_or_scan(
        &ctx.paths.scan_cache,
        &ctx.music_dirs,
        ctx.tags.as_ref(),
        cancel,
        rescan,
        |done, total, path| {
            progress.set_counts(done, total);
            progress.set_current(path.display().to_string());
        },
    )
    .map_err(|e| match e {
        ScanError::Cancelled => JobError::Cancelled,
        other => other.into(),
    })?;

    let library = LibraryCache::load(&ctx.paths.library);
    progress.start(library.tracks.len() as u64, "Matching");
    let local_count = scan.tracks.len();
    let index = ReconciliationIndex::build(scan.tracks);
    let skip = SkipList::load(&ctx.paths.skip_list);

    let lists = compare_tracks(&library.tracks, &index, &skip, cancel, progress)
        .ok_or(JobError::Cancelled)?;
    let summary = format!(
        "{} tagged vs {} local: {} have, {} to download, {} skipped",
        library.tracks.len(),
        local_count,
        lists.have_locally.len(),
        lists.to_download.len(),
        lists.skipped.len()
    );
    ctx.store.replace_lists(
        lists.to_download,
        lists.have_locally,
        lists.skipped,
        scan.folder_stats,
    )?;
    Ok(summary)
}

/// Search the catalog for one track and record the outcome. Returns the
/// matched hit's (url, id) when found.
fn search_one(
    ctx: &JobContext,
    artist: &str,
    title: &str,
    key: &str,
    source: MutationSource,
) -> Result<Option<(String, String)>, JobError> {
    let track = TaggedTrack::new(artist, title);
    let hits = ctx.catalog.search(&search_query(&track))?;

    let Some((hit, score)) = best_catalog_hit(&track, &hits) else {
        log::debug!("Not found in catalog: {}", key);
        ctx.store.record_outcome(key, Outcome::NotFound)?;
        return Ok(None);
    };

    log::debug!("Found {} -> {} ({:.2})", key, hit.display_text, score);
    let starred_changed = ctx.store.update(|s| {
        s.push_outcome(key, Outcome::Found { url: hit.url.clone() });
        s.remember_track_id(key, &hit.id);
        let changed = s.is_starred(key) != hit.favorited;
        if changed {
            s.mark_starred(key, hit.favorited);
        }
        changed
    })?;
    if starred_changed {
        ctx.mutations.append(key, hit.favorited, source)?;
    }
    Ok(Some((hit.url.clone(), hit.id.clone())))
}

/// Run `f` for each target, isolating item failures. Fatal catalog errors,
/// store errors and cancellation end the run.
fn for_each_item<F>(
    targets: Vec<StatusTrack>,
    cancel: &CancelToken,
    progress: &ProgressHandle,
    mut f: F,
) -> Result<u64, JobError>
where
    F: FnMut(&StatusTrack) -> Result<bool, JobError>,
{
    let mut hits = 0;
    for track in &targets {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        progress.set_current(&track.key);
        match f(track) {
            Ok(hit) => {
                if hit {
                    hits += 1;
                }
                progress.advance();
            }
            Err(JobError::Catalog(e)) if !e.is_fatal() => {
                log::warn!("{}: {}", track.key, e);
                progress.fail_item(&track.key, e.to_string());
            }
            Err(JobError::NotInCatalog(key)) => {
                progress.fail_item(&key, "not in catalog");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(hits)
}

fn global_search(ctx: &JobContext, cancel: &CancelToken, progress: &ProgressHandle) -> Result<String, JobError> {
    let status = ctx.store.snapshot();
    let skip = SkipList::load(&ctx.paths.skip_list);
    let targets: Vec<StatusTrack> = status
        .to_download
        .iter()
        .filter(|t| status.url_for(&t.key).is_none() && !skip.contains(&t.key))
        .cloned()
        .collect();

    let total = targets.len();
    progress.start(total as u64, "Searching catalog");
    let found = for_each_item(targets, cancel, progress, |t| {
        Ok(search_one(ctx, &t.artist, &t.title, &t.key, MutationSource::GlobalSearch)?.is_some())
    })?;

    log::info!("Global search: {} of {} found", found, total);
    Ok(format!("{found} of {total} found"))
}

fn star_batch(ctx: &JobContext, cancel: &CancelToken, progress: &ProgressHandle) -> Result<String, JobError> {
    let status = ctx.store.snapshot();
    let targets: Vec<StatusTrack> = status
        .to_download
        .iter()
        .filter(|t| status.url_for(&t.key).is_some() && !status.is_starred(&t.key))
        .cloned()
        .collect();

    let total = targets.len();
    progress.start(total as u64, "Starring found tracks");
    let starred = for_each_item(targets, cancel, progress, |t| {
        let id = resolve_id(ctx, &t.artist, &t.title, &t.key, MutationSource::StarBatch)?;
        ctx.catalog.set_favorite(&id, true)?;
        ctx.store.set_starred(&t.key, true)?;
        ctx.mutations.append(&t.key, true, MutationSource::StarBatch)?;
        Ok(true)
    })?;

    log::info!("Star batch: {} of {} starred", starred, total);
    Ok(format!("{starred} of {total} starred"))
}

/// The remote id for a key, searching for it when unknown.
fn resolve_id(
    ctx: &JobContext,
    artist: &str,
    title: &str,
    key: &str,
    source: MutationSource,
) -> Result<String, JobError> {
    if let Some(id) = ctx.store.snapshot().track_id(key) {
        return Ok(id.to_string());
    }
    match search_one(ctx, artist, title, key, source)? {
        Some((_, id)) => Ok(id),
        None => Err(JobError::NotInCatalog(key.to_string())),
    }
}

fn set_favorite(
    ctx: &JobContext,
    entry: &JobQueueEntry,
    favorite: bool,
    source: MutationSource,
) -> Result<String, JobError> {
    let id = resolve_id(ctx, &entry.artist, &entry.title, &entry.key, source)?;
    ctx.catalog.set_favorite(&id, favorite)?;
    ctx.store.set_starred(&entry.key, favorite)?;
    ctx.mutations.append(&entry.key, favorite, source)?;
    Ok(format!(
        "{} {}",
        if favorite { "Starred" } else { "Unstarred" },
        entry.key
    ))
}

fn single_search(ctx: &JobContext, entry: &JobQueueEntry) -> Result<String, JobError> {
    match search_one(ctx, &entry.artist, &entry.title, &entry.key, MutationSource::SingleSearch)? {
        Some((url, _)) => Ok(format!("Found {}: {}", entry.key, url)),
        None => Ok(format!("Not found: {}", entry.key)),
    }
}

fn download(ctx: &JobContext, entry: &JobQueueEntry) -> Result<String, JobError> {
    let known = entry
        .track_url
        .clone()
        .or_else(|| ctx.store.snapshot().url_for(&entry.key).map(str::to_string));
    let track_url = match known {
        Some(url) => url,
        None => match search_one(ctx, &entry.artist, &entry.title, &entry.key, MutationSource::Download)? {
            Some((url, _)) => url,
            None => return Err(JobError::NotInCatalog(entry.key.clone())),
        },
    };

    let file_url = match ctx.catalog.fetch_download_url(&track_url)? {
        DownloadLink::File(url) => url,
        DownloadLink::NoCredits => return Err(CatalogError::NoCredits.into()),
    };

    let filename = download_filename(&entry.artist, &entry.title, &file_url);
    let dest: PathBuf = ctx.download_dir.join(&filename);
    let bytes = ctx.catalog.download_file(&file_url, &dest)?;
    log::info!("Downloaded {} ({} bytes)", dest.display(), bytes);

    ctx.store.mark_downloaded(
        &entry.key,
        LocalTrack {
            artist: entry.artist.clone(),
            title: entry.title.clone(),
            file_path: dest,
            filename: filename.clone(),
            from_tags: false,
        },
    )?;
    Ok(format!("Downloaded {filename}"))
}

/// `Artist - Title.ext`, extension taken from the file url.
pub fn download_filename(artist: &str, title: &str, file_url: &str) -> String {
    let path = file_url.split(['?', '#']).next().unwrap_or("");
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| crate::SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "mp3".to_string());

    let stem: String = format!("{} - {}", artist.trim(), title.trim())
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_filename() {
        assert_eq!(
            download_filename("A", "B", "https://cdn.test/x/123.flac?sig=abc"),
            "A - B.flac"
        );
        assert_eq!(download_filename("AC/DC", "T.N.T.", "https://cdn.test/get"), "AC_DC - T.N.T..mp3");
        assert_eq!(download_filename("A", "B: Remix?", "https://cdn.test/f.exe"), "A - B_ Remix_.mp3");
    }
}
