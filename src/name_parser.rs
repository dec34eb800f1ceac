//! Artist/album and track-number inference from folder and file names.
//!
//! Library folders follow `Artist - Album` and tracks follow either
//! `07 - Title` or `<disc>-<track> - Title`.

use std::path::{Path, PathBuf};

use crate::error::TrackNumberError;

pub const SEPARATOR: &str = " - ";
pub const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistAlbum {
    pub artist: String,
    pub album: String,
}

/// Splits `Artist - Album`; everything after the first separator is the album.
pub fn split_artist_album(text: &str) -> Option<ArtistAlbum> {
    let (artist, album) = text.split_once(SEPARATOR)?;
    Some(ArtistAlbum {
        artist: artist.to_string(),
        album: album.to_string(),
    })
}

/// Tries `primary`, then `secondary`, then falls back to `Unknown` / `secondary`.
pub fn resolve_artist_album(primary: &str, secondary: &str) -> ArtistAlbum {
    split_artist_album(primary)
        .or_else(|| split_artist_album(secondary))
        .unwrap_or_else(|| ArtistAlbum {
            artist: UNKNOWN_ARTIST.to_string(),
            album: secondary.to_string(),
        })
}

fn parse_number(token: &str) -> Result<u32, TrackNumberError> {
    token
        .trim()
        .parse::<u32>()
        .map_err(|_| TrackNumberError::InvalidNumber(token.to_string()))
}

/// Track number for `track_path`.
///
/// Disc 1 numbering is trusted. For any other disc the embedded number often
/// restarts, so the 1-based position among the folder's `.mp3` files (as
/// returned by `list_siblings`, in path order) is used instead.
pub fn resolve_track_number<F>(track_path: &Path, list_siblings: F) -> Result<u32, TrackNumberError>
where
    F: FnOnce(&Path) -> Vec<PathBuf>,
{
    let stem = track_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some((number_part, _title)) = stem.split_once(SEPARATOR) else {
        return Err(TrackNumberError::MissingSeparator(stem));
    };

    let mut tokens = number_part.split('-');
    let disc = tokens.next().unwrap_or_default();
    match tokens.next() {
        Some(track) if disc == "1" => parse_number(track),
        Some(_) => {
            let directory = track_path.parent().unwrap_or_else(|| Path::new(""));
            Ok(position_among_siblings(track_path, &list_siblings(directory)))
        }
        None => parse_number(number_part),
    }
}

fn position_among_siblings(track_path: &Path, siblings: &[PathBuf]) -> u32 {
    let preceding = siblings
        .iter()
        .take_while(|sibling| sibling.as_path() != track_path)
        .count();
    u32::try_from(preceding + 1).unwrap_or(u32::MAX)
}
