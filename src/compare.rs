//! Split the fingerprint library into what is already local, what is
//! skipped and what still needs downloading.

use rayon::prelude::*;

use crate::jobs::CancelToken;
use crate::jobs::progress::ProgressHandle;
use crate::matcher::index::ReconciliationIndex;
use crate::matcher::{MatchResult, match_track};
use crate::models::TaggedTrack;
use crate::store::skiplist::SkipList;
use crate::store::{HaveLocallyEntry, StatusTrack};

/// The three disjoint lists produced by one compare run.
#[derive(Debug, Default)]
pub struct CompareLists {
    pub to_download: Vec<StatusTrack>,
    pub have_locally: Vec<HaveLocallyEntry>,
    pub skipped: Vec<StatusTrack>,
}

/// Match every tagged track against `index`. Returns `None` if cancelled
/// before all tracks were matched.
pub fn compare_tracks(
    tagged: &[TaggedTrack],
    index: &ReconciliationIndex,
    skip: &SkipList,
    cancel: &CancelToken,
    progress: &ProgressHandle,
) -> Option<CompareLists> {
    let results: Vec<Option<MatchResult>> = tagged
        .par_iter()
        .map(|track| {
            if cancel.is_cancelled() {
                return None;
            }
            let result = match_track(track, index);
            progress.advance();
            Some(result)
        })
        .collect();

    if cancel.is_cancelled() {
        return None;
    }

    let mut lists = CompareLists::default();
    for (track, result) in tagged.iter().zip(results) {
        let result = result?;
        let status = StatusTrack::from(track);
        match result.local {
            Some(local) => lists.have_locally.push(HaveLocallyEntry {
                artist: status.artist,
                title: status.title,
                key: status.key,
                local,
                score: result.score,
            }),
            None if skip.contains(&status.key) => lists.skipped.push(status),
            None => lists.to_download.push(status),
        }
    }

    log::info!(
        "Compare: {} local, {} to download, {} skipped",
        lists.have_locally.len(),
        lists.to_download.len(),
        lists.skipped.len()
    );
    Some(lists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocalTrack;
    use std::path::PathBuf;

    fn local(artist: &str, title: &str) -> LocalTrack {
        LocalTrack {
            artist: artist.into(),
            title: title.into(),
            file_path: PathBuf::from(format!("/music/{artist} - {title}.mp3")),
            filename: format!("{artist} - {title}.mp3"),
            from_tags: false,
        }
    }

    #[test]
    fn test_tracks_land_in_one_list() {
        let index = ReconciliationIndex::build(vec![
            local("Nova Nova", "Prisoner Song (Extended Mix)"),
            local("REZarin", "Androme"),
        ]);
        let tagged = vec![
            TaggedTrack::new("Nova Nova", "Prisoner Song"),
            TaggedTrack::new("R.E.Zarin", "Androme"),
            TaggedTrack::new("Someone", "Missing Track"),
            TaggedTrack::new("Skipped", "Track"),
        ];
        let mut skip = SkipList::default();
        skip.add("Skipped - Track");
        let progress = ProgressHandle::default();

        let lists = compare_tracks(&tagged, &index, &skip, &CancelToken::new(), &progress).unwrap();
        assert_eq!(lists.have_locally.len(), 2);
        assert_eq!(lists.have_locally[0].score, 1.0);
        assert_eq!(lists.to_download.len(), 1);
        assert_eq!(lists.to_download[0].key, "Someone - Missing Track");
        assert_eq!(lists.skipped.len(), 1);
        assert_eq!(progress.snapshot().done, 4);
    }

    #[test]
    fn test_cancelled_compare_returns_none() {
        let index = ReconciliationIndex::build(vec![local("A", "B")]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = compare_tracks(
            &[TaggedTrack::new("A", "B")],
            &index,
            &SkipList::default(),
            &cancel,
            &ProgressHandle::default(),
        );
        assert!(result.is_none());
    }
}
