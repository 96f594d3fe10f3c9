//! String canonicalization shared by matching, dedup and status keys.
//!
//! Every function here is pure and idempotent: feeding an output back in
//! returns it unchanged.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Mix/version qualifiers that do not change the identity of a song.
/// Longer alternatives come first so "extended mix" wins over "extended".
const MIX_SUFFIXES: &str = r"extended\s+mix|extended\s+version|extended\s+edit|extended|original\s+mix|original\s+version|radio\s+edit|radio\s+mix|radio\s+version|club\s+mix|club\s+edit|main\s+mix|album\s+version|single\s+version|clean|explicit";

// "(Extended Mix)", "[Radio Edit]"
static BRACKETED_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\s*[\(\[]\s*(?:{MIX_SUFFIXES})\s*[\)\]]")).unwrap()
});

// "- Extended Mix", "– Radio Edit" at the end of the string
static DASH_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\s+[-–—]\s*(?:{MIX_SUFFIXES})\s*$")).unwrap()
});

// Artist separators: "&", ",", "feat.", "ft.", "featuring"
static ARTIST_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?:&|,|\s(?:feat\.?|ft\.|featuring)\s)\s*").unwrap()
});

// Last parenthetical of a title: "song (tom zeta remix)" -> "tom zeta remix"
static TRAILING_QUALIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[](?P<q>[^\(\)\[\]]+)[\)\]]\s*$").unwrap()
});

/// Check if a character is a Unicode combining mark (diacritical mark).
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Map apostrophe look-alikes to a plain `'`.
fn unify_apostrophes(s: &str) -> String {
    s.replace(
        ['\u{2018}', '\u{2019}', '\u{201B}', '\u{00B4}', '\u{0060}', '\u{2032}', '\u{02BC}'],
        "'",
    )
}

/// Strip diacritics and lowercase. Lowercasing can itself emit combining
/// marks ("İ" -> "i̇"), so marks are filtered on both sides of it.
fn fold(s: &str) -> String {
    let decomposed: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    decomposed
        .to_lowercase()
        .chars()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a title or artist for comparison.
///
/// Lowercases, strips diacritics, unifies apostrophes, removes mix/version
/// suffixes such as "(Extended Mix)" or "- Radio Edit", and collapses
/// whitespace.
pub fn normalize(s: &str) -> String {
    let mut result = collapse_whitespace(&fold(&unify_apostrophes(s)));

    // Stripping one suffix can expose another ("Song - Extended - Radio Edit")
    loop {
        let stripped = BRACKETED_SUFFIX_RE.replace_all(&result, " ");
        let stripped = DASH_SUFFIX_RE.replace(&stripped, "");
        let stripped = collapse_whitespace(&stripped);
        if stripped == result {
            break;
        }
        result = stripped;
    }

    result
}

/// Stricter form of [`normalize`]: only `[a-z0-9 ]` survives and dots are
/// removed, so "R.E.Zarin" and "REZarin" compare equal.
pub fn canonicalize(s: &str) -> String {
    let kept: String = normalize(s)
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect();
    collapse_whitespace(&kept)
}

/// Order-insensitive artist normalization: "B & A feat. C" and
/// "A, C & B" both become "a & b & c".
pub fn normalize_artist(s: &str) -> String {
    let normalized = normalize(&s.replace(['(', ')', '[', ']'], " "));
    let mut tokens: Vec<&str> = ARTIST_SEPARATOR_RE
        .split(&normalized)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens.join(" & ")
}

/// Dedup key for the library cache: canonical artist + canonical title.
pub fn identity_key(artist: &str, title: &str) -> String {
    format!(
        "{}|{}",
        canonicalize(&normalize_artist(artist)),
        canonicalize(title)
    )
}

/// Display key used by the status store: `"Artist - Title"`.
pub fn status_key(artist: &str, title: &str) -> String {
    format!("{} - {}", artist.trim(), title.trim())
}

/// The last parenthetical qualifier of a normalized title, if any.
/// Mix suffixes are already gone at this point, so what remains is a
/// remix/version credit like "tom zeta remix".
pub fn trailing_qualifier(title: &str) -> Option<String> {
    let normalized = normalize(title);
    TRAILING_QUALIFIER_RE
        .captures(&normalized)
        .and_then(|c| c.name("q"))
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| !q.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_mix_suffix() {
        assert_eq!(normalize("Prisoner Song (Extended Mix)"), "prisoner song");
        assert_eq!(normalize("Prisoner Song [Radio Edit]"), "prisoner song");
        assert_eq!(normalize("Prisoner Song - Original Mix"), "prisoner song");
        assert_eq!(normalize("Prisoner Song (Extended)"), "prisoner song");
    }

    #[test]
    fn test_normalize_keeps_remix_credit() {
        assert_eq!(normalize("Song (Tom Zeta Remix)"), "song (tom zeta remix)");
    }

    #[test]
    fn test_normalize_diacritics_and_apostrophes() {
        assert_eq!(normalize("Beyoncé"), "beyonce");
        assert_eq!(normalize("Motörhead"), "motorhead");
        assert_eq!(normalize("Don’t Stop"), "don't stop");
        assert_eq!(normalize("Don´t Stop"), "don't stop");
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Some   Song \t Title "), "some song title");
    }

    #[test]
    fn test_normalize_chained_suffixes() {
        assert_eq!(normalize("Song - Extended - Radio Edit"), "song");
        assert_eq!(normalize("Song (Radio Edit) (Extended Mix)"), "song");
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = [
            "Prisoner Song (Extended Mix)",
            "Song - Extended - Radio Edit",
            "Beyoncé – Halo (Original Mix)",
            "R.E.Zarin",
            "İstanbul",
            "㎆ Song",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_canonicalize_drops_dots_and_punctuation() {
        assert_eq!(canonicalize("R.E.Zarin"), "rezarin");
        assert_eq!(canonicalize("REZarin"), "rezarin");
        assert_eq!(canonicalize("AC/DC"), "acdc");
        assert_eq!(canonicalize("Don't Stop (Tom Zeta Remix)"), "dont stop tom zeta remix");
    }

    #[test]
    fn test_canonicalize_idempotent() {
        for input in ["R.E.Zarin", "Song (Tom Zeta Remix)", "Beyoncé & Jay-Z"] {
            let once = canonicalize(input);
            assert_eq!(canonicalize(&once), once);
        }
    }

    #[test]
    fn test_normalize_artist_order_insensitive() {
        assert_eq!(
            normalize_artist("Tom Zeta & Josh Gigante"),
            normalize_artist("Josh Gigante, Tom Zeta")
        );
        assert_eq!(normalize_artist("B feat. A"), "a & b");
        assert_eq!(normalize_artist("Artist (feat. Other)"), "artist & other");
    }

    #[test]
    fn test_normalize_artist_idempotent() {
        let once = normalize_artist("Zed, Alpha feat. Mid & Beta");
        assert_eq!(normalize_artist(&once), once);
    }

    #[test]
    fn test_identity_key() {
        assert_eq!(
            identity_key("R.E.Zarin", "Androme (Extended Mix)"),
            identity_key("REZarin", "Androme")
        );
    }

    #[test]
    fn test_status_key() {
        assert_eq!(status_key(" X ", "Y "), "X - Y");
    }

    #[test]
    fn test_trailing_qualifier() {
        assert_eq!(
            trailing_qualifier("Song (Tom Zeta Remix)").as_deref(),
            Some("tom zeta remix")
        );
        assert_eq!(trailing_qualifier("Song (Extended Mix)"), None);
        assert_eq!(trailing_qualifier("Song"), None);
    }
}
