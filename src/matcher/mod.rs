//! Fuzzy identity matching between a fingerprinted track and the local corpus.
//!
//! Stages run in order and the first one that produces a match wins:
//! 1. exact (normalized artist, normalized title) lookup
//! 2. canonical equality / containment
//! 3. fuzzy scan restricted to candidates sharing the two rarest title words
//!
//! Stages 2 and 3 both apply the remix guard, which refuses to pair two
//! different remixes of the same song.

pub mod index;

use std::collections::HashSet;

use crate::canonical::{canonicalize, normalize, normalize_artist, trailing_qualifier};
use crate::models::{LocalTrack, TaggedTrack};
use index::ReconciliationIndex;

/// Upper bound on candidates examined by the fuzzy stage.
pub const MAX_CANDIDATES: usize = 2000;

/// Score reported for a canonical equality/containment match.
pub const CONTAINMENT_SCORE: f64 = 0.95;

/// Trailing qualifiers less similar than this mark different remixes.
pub const REMIX_GUARD_THRESHOLD: f64 = 0.65;

const TITLE_WEIGHT: f64 = 0.6;
const ARTIST_WEIGHT: f64 = 0.4;

/// Minimum length of the shorter side for a containment match.
const MIN_TITLE_CONTAINMENT: usize = 5;
const MIN_ARTIST_CONTAINMENT: usize = 3;

/// Which stage produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    Exact,
    Containment,
    Fuzzy,
}

/// Outcome of matching one tagged track. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub local: Option<LocalTrack>,
    /// Index of the matched track in the corpus the index was built from.
    pub index: Option<usize>,
    pub score: f64,
    pub stage: Option<MatchStage>,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            local: None,
            index: None,
            score: 0.0,
            stage: None,
        }
    }

    fn found(index: &ReconciliationIndex, i: usize, score: f64, stage: MatchStage) -> Self {
        Self {
            local: Some(index.track(i).clone()),
            index: Some(i),
            score,
            stage: Some(stage),
        }
    }

    pub fn is_match(&self) -> bool {
        self.local.is_some()
    }
}

/// Comparison forms of the tagged track, computed once per query.
struct Query {
    exact_key: index::ExactKey,
    title: String,
    /// Canonical, order-insensitive artist (for similarity).
    artist: String,
    /// Canonical artist in the order given (for filename checks).
    artist_as_written: String,
    qualifier: Option<String>,
}

impl Query {
    fn new(track: &TaggedTrack) -> Self {
        let norm_artist = normalize_artist(&track.artist);
        Self {
            exact_key: (norm_artist.clone(), normalize(&track.title)),
            title: canonicalize(&track.title),
            artist: canonicalize(&norm_artist),
            artist_as_written: canonicalize(&track.artist),
            qualifier: trailing_qualifier(&track.title).map(|q| canonicalize(&q)),
        }
    }
}

/// Find the best local match for `track`.
pub fn match_track(track: &TaggedTrack, index: &ReconciliationIndex) -> MatchResult {
    if index.is_empty() {
        return MatchResult::none();
    }

    let query = Query::new(track);
    if query.exact_key.1.is_empty() {
        return MatchResult::none();
    }

    if let Some(i) = exact_stage(&query, index) {
        return MatchResult::found(index, i, 1.0, MatchStage::Exact);
    }

    if query.title.is_empty() {
        return MatchResult::none();
    }

    if let Some(i) = containment_stage(&query, index) {
        return MatchResult::found(index, i, CONTAINMENT_SCORE, MatchStage::Containment);
    }

    match fuzzy_stage(&query, index) {
        Some((i, score)) => MatchResult::found(index, i, score, MatchStage::Fuzzy),
        None => MatchResult::none(),
    }
}

fn exact_stage(query: &Query, index: &ReconciliationIndex) -> Option<usize> {
    let hits = index.exact_matches(&query.exact_key);
    hits.iter()
        .copied()
        .find(|&i| index.entry(i).has_extended)
        .or_else(|| hits.first().copied())
}

/// Linear in the corpus size for every query that misses the exact stage.
/// Containment works on substrings, so "starlight" has to find
/// "starlights"; the title-word buckets only hold whole words and can't
/// narrow the scan without losing those matches.
fn containment_stage(query: &Query, index: &ReconciliationIndex) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, entry) in index.entries().iter().enumerate() {
        if !contains_either(&query.title, &entry.title, MIN_TITLE_CONTAINMENT)
            || !contains_either(&query.artist, &entry.artist, MIN_ARTIST_CONTAINMENT)
        {
            continue;
        }
        if remix_guard_rejects(&query.qualifier, &entry.qualifier) {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(b) if entry.has_extended && !index.entry(b).has_extended => best = Some(i),
            Some(_) => {}
        }
    }
    best
}

fn fuzzy_stage(query: &Query, index: &ReconciliationIndex) -> Option<(usize, f64)> {
    let candidates = fuzzy_candidates(query, index);
    if candidates.is_empty() {
        return None;
    }

    let artist_tokens: Vec<&str> = query
        .artist_as_written
        .split(' ')
        .filter(|t| t.len() >= MIN_ARTIST_CONTAINMENT)
        .collect();

    let mut best: Option<(usize, f64)> = None;

    for i in candidates {
        let entry = index.entry(i);
        let title_sim = similarity(&query.title, &entry.title);
        let artist_sim = similarity(&query.artist, &entry.artist);

        let filename_words: HashSet<&str> = entry.filename.split(' ').collect();
        let artist_token_in_filename = artist_tokens.iter().any(|t| filename_words.contains(t));
        let artist_in_filename =
            !query.artist_as_written.is_empty() && entry.filename.contains(&query.artist_as_written);
        let title_in_filename = entry.filename.contains(&query.title);

        if !accepts(
            title_sim,
            artist_sim,
            artist_token_in_filename,
            artist_in_filename,
            title_in_filename,
        ) {
            continue;
        }
        if remix_guard_rejects(&query.qualifier, &entry.qualifier) {
            continue;
        }

        let combined = TITLE_WEIGHT * title_sim + ARTIST_WEIGHT * artist_sim;
        let better = match best {
            None => true,
            Some((b, best_score)) => {
                combined > best_score
                    || (combined == best_score && entry.has_extended && !index.entry(b).has_extended)
            }
        };
        if better {
            best = Some((i, combined));
        }
    }

    best
}

/// Acceptance rules of the fuzzy stage.
fn accepts(
    title_sim: f64,
    artist_sim: f64,
    artist_token_in_filename: bool,
    artist_in_filename: bool,
    title_in_filename: bool,
) -> bool {
    (artist_sim >= 0.7 && title_sim >= 0.7)
        || (title_sim >= 0.8 && artist_sim >= 0.5)
        || (title_sim >= 0.95 && artist_sim >= 0.4)
        || (title_sim >= 0.85 && artist_token_in_filename)
        || (title_sim >= 0.9 && (artist_sim >= 0.35 || artist_token_in_filename))
        || (artist_in_filename && title_sim >= 0.5)
        || (title_in_filename && artist_sim >= 0.5)
}

/// Candidate corpus indices: tracks sharing the two rarest title words.
/// Falls back to the union of both buckets when the intersection is empty.
fn fuzzy_candidates(query: &Query, index: &ReconciliationIndex) -> Vec<usize> {
    let mut words: Vec<&str> = query.title.split(' ').filter(|w| w.len() > 1).collect();
    words.sort_unstable();
    words.dedup();

    let mut buckets: Vec<(&str, &[usize])> = words
        .into_iter()
        .map(|w| (w, index.bucket(w)))
        .filter(|(_, b)| !b.is_empty())
        .collect();
    buckets.sort_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| a.0.cmp(b.0)));

    let mut candidates = match buckets.as_slice() {
        [] => Vec::new(),
        [(_, only)] => only.to_vec(),
        [(_, first), (_, second), ..] => {
            let both = intersect_sorted(first, second);
            if both.is_empty() {
                union_sorted(first, second)
            } else {
                both
            }
        }
    };
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn union_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out: Vec<usize> = a.iter().chain(b.iter()).copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// True if the strings are equal, or one contains the other and the
/// shorter one has at least `min_len` characters.
fn contains_either(a: &str, b: &str, min_len: usize) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() >= min_len && long.contains(short)
}

/// Reject pairs whose titles both end in a qualifier and those qualifiers
/// disagree, e.g. "(Tom Zeta Remix)" vs "(Other Remix)".
fn remix_guard_rejects(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => similarity(a, b) < REMIX_GUARD_THRESHOLD,
        _ => false,
    }
}

/// Word-set Jaccard similarity.
fn jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<&str> = a.split_whitespace().collect();
    let wb: HashSet<&str> = b.split_whitespace().collect();
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    wa.intersection(&wb).count() as f64 / union as f64
}

/// Similarity of two canonical strings in `[0, 1]`.
///
/// 1.0 when equal. When one contains the other the score blends Jaccard
/// with the length ratio and is capped at 0.85; otherwise plain Jaccard.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let jac = jaccard(a, b);
    if a.contains(b) || b.contains(a) {
        let (la, lb) = (a.chars().count() as f64, b.chars().count() as f64);
        let ratio = la.min(lb) / la.max(lb);
        return (0.5 * jac + 0.5 * ratio).min(0.85);
    }
    jac
}
