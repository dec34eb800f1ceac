//! Read-only phase: select rows needing repair and derive their new values.
//!
//! Every generator polls the abort flag before each row, drops rows whose
//! path vanished from disk, and keeps whatever it produced when a query fails.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::ProcessConfig;
use crate::db_manager::{DbManager, RowSelection};
use crate::error::TweakError;
use crate::image_pipeline::{lookup_cover, CoverLookup};
use crate::media_file_discovery::collect_track_files;
use crate::name_parser::{resolve_artist_album, resolve_track_number};
use crate::reconcile::operations::{
    PlaylistImageOperation, PlaylistTracklistOperation, TrackNumberOperation,
};
use crate::reconcile::run_context::RunContext;

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn stem_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Runs `visit` for every row with an existing path, stopping on abort.
fn for_each_existing_row<F>(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    selection: RowSelection,
    kind: &str,
    existence_of: fn(&Path) -> &Path,
    mut visit: F,
) -> Result<(), TweakError>
where
    F: FnMut(&mut RunContext<'_>, PathBuf),
{
    db.for_each_selected_row(selection, |row| {
        if ctx.is_aborted() {
            return ControlFlow::Break(());
        }
        let Some(path) = row.path else {
            ctx.warn(format!("{kind} row without a path skipped."));
            return ControlFlow::Continue(());
        };
        let path = PathBuf::from(path);
        if !existence_of(&path).exists() {
            ctx.warn(format!("{kind} path '{}' doesn't exist!", path.display()));
            return ControlFlow::Continue(());
        }
        visit(ctx, path);
        ControlFlow::Continue(())
    })
}

fn itself(path: &Path) -> &Path {
    path
}

fn parent_folder(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

fn cover_descriptor(ctx: &mut RunContext<'_>, directory: &Path, image_name: &str) -> String {
    let lookup = lookup_cover(directory, image_name);
    match &lookup {
        CoverLookup::NotFound => debug!(
            "no file containing '{}' in {}",
            image_name,
            directory.display()
        ),
        CoverLookup::Unusable { path, reason } => {
            ctx.warn(format!("Unable to use image '{}': {}.", path.display(), reason))
        }
        CoverLookup::Found(_) => {}
    }
    lookup.descriptor_text()
}

fn finish_phase<T>(
    ctx: &mut RunContext<'_>,
    result: Result<(), TweakError>,
    operations: Vec<T>,
) -> Vec<T> {
    if let Err(err) = result {
        ctx.record_error(&err);
    }
    operations
}

/// Artist, album and cover for the audio files of each incomplete playlist.
pub fn generate_playlist_image_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
) -> Vec<PlaylistImageOperation> {
    let mut operations = Vec::new();
    if !config.playlist_images {
        return operations;
    }

    let result = for_each_existing_row(
        db,
        ctx,
        RowSelection::PlaylistsMissingMetadata,
        "Playlist",
        itself,
        |ctx, playlist_path| {
            ctx.info(format!(
                "Generate metadata information of playlist '{}'.",
                display_name(&playlist_path)
            ));
            let folder = parent_folder(&playlist_path);
            let image = cover_descriptor(ctx, folder, &config.image_name);
            let names = resolve_artist_album(&display_name(folder), &stem_name(&playlist_path));

            operations.push(PlaylistImageOperation {
                path: playlist_path,
                image,
                artist: names.artist,
                album: names.album,
            });
            ctx.advance();
        },
    );
    finish_phase(ctx, result, operations)
}

/// Membership of playlists whose payload is still the empty sentinel.
///
/// Folders are listed first, then ids are looked up per playlist. On abort
/// the playlists already looked up are returned; a listed playlist without
/// ids yields no operation.
pub fn generate_playlist_tracklist_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
) -> Vec<PlaylistTracklistOperation> {
    if !config.playlist_tracklist {
        return Vec::new();
    }

    let mut pending = Vec::new();
    let result = for_each_existing_row(
        db,
        ctx,
        RowSelection::EmptyPlaylists,
        "Playlist",
        parent_folder,
        |ctx, playlist_path| match collect_track_files(parent_folder(&playlist_path)) {
            Ok(tracks) => pending.push((playlist_path, tracks)),
            Err(err) => ctx.warn(format!(
                "Unable to list tracks of playlist '{}': {}",
                playlist_path.display(),
                err
            )),
        },
    );
    if let Err(err) = result {
        ctx.record_error(&err);
    }
    if pending.is_empty() {
        return Vec::new();
    }

    let mut lookup = match db.track_id_lookup() {
        Ok(lookup) => lookup,
        Err(err) => {
            ctx.record_error(&err);
            return Vec::new();
        }
    };

    let mut operations = Vec::with_capacity(pending.len());
    for (playlist_path, candidates) in pending {
        if ctx.is_aborted() {
            break;
        }
        ctx.info(format!(
            "Generate track information of playlist '{}'.",
            display_name(&playlist_path)
        ));

        let mut tracks = Vec::with_capacity(candidates.len());
        let mut item_ids = Vec::with_capacity(candidates.len());
        for track in candidates {
            match lookup.find(&track.to_string_lossy()) {
                Ok(Some(item_id)) => {
                    tracks.push(track);
                    item_ids.push(item_id);
                }
                Ok(None) => ctx.warn(format!(
                    "Track '{}' is not in the database, left out of playlist '{}'.",
                    track.display(),
                    display_name(&playlist_path)
                )),
                Err(err) => ctx.record_error(&err),
            }
        }

        operations.push(PlaylistTracklistOperation {
            path: playlist_path,
            tracks,
            item_ids,
        });
        ctx.advance();
    }
    operations
}

/// Track numbers for audio rows without one, inferred from the file name.
pub fn generate_track_number_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
) -> Vec<TrackNumberOperation> {
    let mut operations = Vec::new();
    if !config.track_numbers {
        return operations;
    }

    let result = for_each_existing_row(
        db,
        ctx,
        RowSelection::TracksMissingIndex,
        "Track",
        itself,
        |ctx, track_path| {
            let mut listing_error = None;
            let resolved = resolve_track_number(&track_path, |folder| {
                collect_track_files(folder).unwrap_or_else(|err| {
                    listing_error = Some(err);
                    Vec::new()
                })
            });
            if let Some(err) = listing_error {
                ctx.warn(format!(
                    "Unable to number track '{}': {}",
                    track_path.display(),
                    err
                ));
                return;
            }

            match resolved {
                Ok(track_number) => {
                    operations.push(TrackNumberOperation {
                        path: track_path,
                        track_number,
                    });
                    ctx.advance();
                }
                Err(err) => ctx.warn(format!(
                    "Track path '{}' split error: {}.",
                    track_path.display(),
                    err
                )),
            }
        },
    );
    finish_phase(ctx, result, operations)
}

/// Artist, album and cover for incomplete album rows.
///
/// An album whose folder already holds a repaired playlist reuses that
/// playlist's values instead of decoding the cover again.
pub fn generate_album_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
    playlist_operations: &[PlaylistImageOperation],
) -> Vec<PlaylistImageOperation> {
    let mut operations = Vec::new();
    if !config.albums {
        return operations;
    }

    let mut by_folder: HashMap<&Path, &PlaylistImageOperation> = HashMap::new();
    for operation in playlist_operations {
        by_folder.entry(operation.folder()).or_insert(operation);
    }

    let result = for_each_existing_row(
        db,
        ctx,
        RowSelection::AlbumsMissingMetadata,
        "Album",
        itself,
        |ctx, album_path| {
            ctx.info(format!(
                "Generate metadata information of album '{}'.",
                display_name(&album_path)
            ));

            let operation = match by_folder.get(album_path.as_path()) {
                Some(playlist) => PlaylistImageOperation {
                    path: album_path,
                    image: playlist.image.clone(),
                    artist: playlist.artist.clone(),
                    album: playlist.album.clone(),
                },
                None => {
                    let folder_name = display_name(&album_path);
                    let names = resolve_artist_album(&folder_name, &folder_name);
                    let image = if config.playlist_images {
                        cover_descriptor(ctx, &album_path, &config.image_name)
                    } else {
                        String::new()
                    };
                    PlaylistImageOperation {
                        path: album_path,
                        image,
                        artist: names.artist,
                        album: names.album,
                    }
                }
            };
            operations.push(operation);
        },
    );
    finish_phase(ctx, result, operations)
}
