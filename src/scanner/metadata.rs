use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Artist and title read from embedded tags.
#[derive(Debug, Clone, PartialEq)]
pub struct TagIdentity {
    pub artist: String,
    pub title: String,
}

/// Reads per-file artist/title tags. Only consulted when the file name
/// doesn't yield an identity.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Option<TagIdentity>;
}

/// Tag reader backed by lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTags;

impl TagReader for LoftyTags {
    fn read(&self, path: &Path) -> Option<TagIdentity> {
        read_tags(path)
    }
}

/// Read artist/title from an audio file. Returns `None` when the file has no
/// readable tag or either field is blank.
pub fn read_tags(path: &Path) -> Option<TagIdentity> {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return None;
        }
    };

    // Try primary tag, then fall back
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())?;

    let artist = tag.artist().map(|s| s.trim().to_string())?;
    let title = tag.title().map(|s| s.trim().to_string())?;

    if artist.is_empty() || title.is_empty() {
        return None;
    }

    Some(TagIdentity { artist, title })
}

/// Tag reader that never finds anything. Used where tag reading is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTags;

impl TagReader for NoTags {
    fn read(&self, _path: &Path) -> Option<TagIdentity> {
        None
    }
}
