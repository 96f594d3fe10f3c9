use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Artist and title recovered from a file name.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedName {
    pub artist: String,
    pub title: String,
}

// Leading track number: "01 - ", "01. ", "1)", "[01] ", "A1 - " (vinyl side), "03 ".
// A bare number followed by a space only counts when zero-padded so that
// artists like "2 Unlimited" survive.
static TRACK_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[\d{1,3}\]\s*|(?:[A-D]\d{1,2}|\d{1,3})\s*[-–—._)]\s*|0\d\s+)").unwrap()
});

// "Artist - Title", separator is a dash surrounded by whitespace
static ARTIST_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<artist>.+?)\s+[-–—]\s+(?P<title>.+)$").unwrap()
});

// Store/promo noise appended to downloaded files: "[FREE DOWNLOAD]", "(Official Audio)"
static NOISE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[\(\[](?:free\s+download|official\s+audio|official\s+video|premiere|hq)[\)\]]\s*$")
        .unwrap()
});

/// Parse `Artist - Title` out of a file name.
///
/// Underscores count as spaces, leading track numbers are dropped and the
/// first dash separates artist from title. Returns `None` when the name
/// doesn't follow that convention; the caller then falls back to tags.
pub fn parse_filename(path: &Path) -> Option<ParsedName> {
    let stem = path.file_stem().and_then(|s| s.to_str())?;

    let spaced = stem.replace('_', " ");
    let trimmed = spaced.trim();
    let without_number = TRACK_PREFIX_RE.replace(trimmed, "");
    let cleaned = NOISE_SUFFIX_RE.replace(&without_number, "");

    let caps = ARTIST_TITLE_RE.captures(cleaned.trim())?;
    let artist = caps.name("artist")?.as_str().trim().to_string();
    let title = caps.name("title")?.as_str().trim().to_string();

    if artist.is_empty() || title.is_empty() {
        return None;
    }

    Some(ParsedName { artist, title })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(name: &str) -> Option<(String, String)> {
        parse_filename(&PathBuf::from(name)).map(|p| (p.artist, p.title))
    }

    #[test]
    fn test_plain_artist_title() {
        assert_eq!(
            parse("Nova Nova - Prisoner Song (Extended Mix).mp3"),
            Some(("Nova Nova".into(), "Prisoner Song (Extended Mix)".into()))
        );
    }

    #[test]
    fn test_track_number_prefix() {
        assert_eq!(parse("01 - Artist - Title.flac"), Some(("Artist".into(), "Title".into())));
        assert_eq!(parse("07. Artist - Title.flac"), Some(("Artist".into(), "Title".into())));
        assert_eq!(parse("[03] Artist - Title.mp3"), Some(("Artist".into(), "Title".into())));
        assert_eq!(parse("A2 - Artist - Title.wav"), Some(("Artist".into(), "Title".into())));
    }

    #[test]
    fn test_leading_digit_artist_kept() {
        assert_eq!(
            parse("2 Unlimited - Get Ready.mp3"),
            Some(("2 Unlimited".into(), "Get Ready".into()))
        );
        assert_eq!(parse("03 Artist - Title.mp3"), Some(("Artist".into(), "Title".into())));
    }

    #[test]
    fn test_underscores() {
        assert_eq!(
            parse("Moon_Boots_-_Keep_The_Faith.mp3"),
            Some(("Moon Boots".into(), "Keep The Faith".into()))
        );
    }

    #[test]
    fn test_title_with_inner_dash() {
        assert_eq!(
            parse("Artist - Title - Original Mix.mp3"),
            Some(("Artist".into(), "Title - Original Mix".into()))
        );
    }

    #[test]
    fn test_hyphenated_artist_is_not_split() {
        assert_eq!(
            parse("Jay-Z - Encore.mp3"),
            Some(("Jay-Z".into(), "Encore".into()))
        );
    }

    #[test]
    fn test_noise_suffix() {
        assert_eq!(
            parse("Artist - Title [FREE DOWNLOAD].mp3"),
            Some(("Artist".into(), "Title".into()))
        );
    }

    #[test]
    fn test_no_separator() {
        assert_eq!(parse("track01.mp3"), None);
        assert_eq!(parse("Just A Title.mp3"), None);
    }
}
