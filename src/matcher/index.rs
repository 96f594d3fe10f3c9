use std::collections::HashMap;

use rayon::prelude::*;

use crate::canonical::{self, canonicalize, normalize, normalize_artist};
use crate::models::LocalTrack;

/// Exact-match key: (normalized artist, normalized title).
pub type ExactKey = (String, String);

/// Precomputed comparison forms for one local track.
#[derive(Debug, Clone)]
pub struct CanonicalEntry {
    pub exact_key: ExactKey,
    /// Canonical title.
    pub title: String,
    /// Canonical, order-insensitive artist.
    pub artist: String,
    /// Canonical filename without extension.
    pub filename: String,
    /// Canonical trailing qualifier of the title, e.g. "tom zeta remix".
    pub qualifier: Option<String>,
    pub has_extended: bool,
}

impl CanonicalEntry {
    fn from_track(track: &LocalTrack) -> Self {
        let norm_artist = normalize_artist(&track.artist);
        let stem = strip_audio_extension(&track.filename);

        Self {
            exact_key: (norm_artist.clone(), normalize(&track.title)),
            title: canonicalize(&track.title),
            artist: canonicalize(&norm_artist),
            filename: canonicalize(stem),
            qualifier: canonical::trailing_qualifier(&track.title).map(|q| canonicalize(&q)),
            has_extended: track.title.to_lowercase().contains("extended"),
        }
    }
}

/// Drop a trailing audio extension. Anything else after the last dot is
/// part of the name ("R.E.Zarin - Androme", "AC/DC - T.N.T").
fn strip_audio_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if crate::SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => name,
    }
}

/// Lookup structures built once per compare run over the whole local corpus,
/// then shared by every fingerprinted track matched in that run.
#[derive(Debug, Default)]
pub struct ReconciliationIndex {
    corpus: Vec<LocalTrack>,
    exact: HashMap<ExactKey, Vec<usize>>,
    canonical: Vec<CanonicalEntry>,
    /// Title word -> ascending corpus indices.
    words: HashMap<String, Vec<usize>>,
}

impl ReconciliationIndex {
    pub fn build(corpus: Vec<LocalTrack>) -> Self {
        let canonical: Vec<CanonicalEntry> =
            corpus.par_iter().map(CanonicalEntry::from_track).collect();

        let mut exact: HashMap<ExactKey, Vec<usize>> = HashMap::with_capacity(corpus.len());
        let mut words: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, entry) in canonical.iter().enumerate() {
            exact.entry(entry.exact_key.clone()).or_default().push(i);

            let mut seen: Vec<&str> = Vec::new();
            for word in entry.title.split(' ').filter(|w| w.len() > 1) {
                if seen.contains(&word) {
                    continue;
                }
                seen.push(word);
                words.entry(word.to_string()).or_default().push(i);
            }
        }

        log::debug!(
            "Built reconciliation index: {} tracks, {} exact keys, {} title words",
            corpus.len(),
            exact.len(),
            words.len()
        );

        Self {
            corpus,
            exact,
            canonical,
            words,
        }
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn track(&self, i: usize) -> &LocalTrack {
        &self.corpus[i]
    }

    pub fn corpus(&self) -> &[LocalTrack] {
        &self.corpus
    }

    pub fn entry(&self, i: usize) -> &CanonicalEntry {
        &self.canonical[i]
    }

    pub fn entries(&self) -> &[CanonicalEntry] {
        &self.canonical
    }

    pub fn exact_matches(&self, key: &ExactKey) -> &[usize] {
        self.exact.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Corpus indices whose canonical title contains `word`.
    pub fn bucket(&self, word: &str) -> &[usize] {
        self.words.get(word).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn local(artist: &str, title: &str) -> LocalTrack {
        let filename = format!("{artist} - {title}.mp3");
        LocalTrack {
            artist: artist.to_string(),
            title: title.to_string(),
            file_path: PathBuf::from("/music").join(&filename),
            filename,
            from_tags: false,
        }
    }

    #[test]
    fn test_build_exact_and_words() {
        let index = ReconciliationIndex::build(vec![
            local("Nova Nova", "Prisoner Song (Extended Mix)"),
            local("Nova Nova", "Prisoner Song"),
            local("Other", "Song Song"),
        ]);

        let key = ("nova nova".to_string(), "prisoner song".to_string());
        assert_eq!(index.exact_matches(&key), &[0, 1]);
        assert_eq!(index.bucket("song"), &[0, 1, 2]);
        assert_eq!(index.bucket("prisoner"), &[0, 1]);
        assert!(index.bucket("missing").is_empty());
        assert!(index.entry(0).has_extended);
        assert!(!index.entry(1).has_extended);
    }

    #[test]
    fn test_canonical_entry_filename_without_extension() {
        let index = ReconciliationIndex::build(vec![local("R.E.Zarin", "Androme")]);
        assert_eq!(index.entry(0).filename, "rezarin androme");
        assert_eq!(index.entry(0).artist, "rezarin");
    }

    #[test]
    fn test_filename_keeps_dots_and_slashes_without_audio_extension() {
        let mut hit = local("R.E.Zarin", "Androme");
        hit.filename = "R.E.Zarin - Androme".to_string();
        let mut slashed = local("AC/DC", "T.N.T");
        slashed.filename = "AC/DC - T.N.T".to_string();
        let mut flac = local("AC/DC", "T.N.T");
        flac.filename = "AC/DC - T.N.T.FLAC".to_string();

        let index = ReconciliationIndex::build(vec![hit, slashed, flac]);
        assert_eq!(index.entry(0).filename, "rezarin androme");
        assert_eq!(index.entry(1).filename, "acdc tnt");
        assert_eq!(index.entry(2).filename, "acdc tnt");
    }

    #[test]
    fn test_empty_index() {
        let index = ReconciliationIndex::build(Vec::new());
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }
}
