//! In-memory records produced by the generators and consumed by the appliers.

use std::path::{Path, PathBuf};

/// Artist/album/cover data for a playlist folder or an album row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistImageOperation {
    /// Stored path of the playlist file or album folder.
    pub path: PathBuf,
    /// Serialized image descriptor; empty when no usable cover was found.
    pub image: String,
    pub artist: String,
    pub album: String,
}

impl PlaylistImageOperation {
    /// Folder holding the playlist's audio files.
    pub fn folder(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackNumberOperation {
    pub path: PathBuf,
    pub track_number: u32,
}

/// Rebuilt membership of a never-populated playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistTracklistOperation {
    pub path: PathBuf,
    /// Member files in path order.
    pub tracks: Vec<PathBuf>,
    /// Item id of each entry in `tracks`, same order.
    pub item_ids: Vec<String>,
}

impl PlaylistTracklistOperation {
    pub fn members(&self) -> impl Iterator<Item = (&PathBuf, &String)> {
        self.tracks.iter().zip(self.item_ids.iter())
    }
}

/// Everything the generate phase produced for one run.
#[derive(Debug, Default)]
pub struct GeneratedOperations {
    pub playlist_images: Vec<PlaylistImageOperation>,
    pub playlist_tracklists: Vec<PlaylistTracklistOperation>,
    pub track_numbers: Vec<TrackNumberOperation>,
    pub albums: Vec<PlaylistImageOperation>,
}

impl GeneratedOperations {
    pub fn total(&self) -> usize {
        self.playlist_images.len()
            + self.playlist_tracklists.len()
            + self.track_numbers.len()
            + self.albums.len()
    }
}
