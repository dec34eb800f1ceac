//! Sizes the progress denominator before any work starts.

use crate::config::ProcessConfig;
use crate::db_manager::{DbManager, RowSelection};
use crate::reconcile::run_context::RunContext;

struct CountedRepair {
    enabled: bool,
    selection: RowSelection,
    /// Progress units per row: generation and application, or application only.
    units_per_row: u64,
    found_label: &'static str,
}

fn counted_repairs(config: &ProcessConfig) -> [CountedRepair; 4] {
    [
        CountedRepair {
            enabled: config.playlist_images,
            selection: RowSelection::PlaylistsMissingMetadata,
            units_per_row: 2,
            found_label: "playlists to update image, artists and album metadata",
        },
        CountedRepair {
            enabled: config.playlist_tracklist,
            selection: RowSelection::EmptyPlaylists,
            units_per_row: 2,
            found_label: "playlists to update audio tracks list",
        },
        CountedRepair {
            enabled: config.track_numbers,
            selection: RowSelection::TracksMissingIndex,
            units_per_row: 2,
            found_label: "tracks to update track number",
        },
        // Album data is mostly reused from playlists, only the update is counted.
        CountedRepair {
            enabled: config.albums,
            selection: RowSelection::AlbumsMissingMetadata,
            units_per_row: 1,
            found_label: "albums to update image, artists and album metadata",
        },
    ]
}

/// Total progress units for the enabled repairs. Failed counts contribute zero.
pub fn count_operations(db: &DbManager, ctx: &mut RunContext<'_>, config: &ProcessConfig) -> u64 {
    let mut total = 0u64;
    for repair in counted_repairs(config) {
        if !repair.enabled {
            continue;
        }
        match db.count_rows(repair.selection) {
            Ok(count) => {
                ctx.info(format!("Found {} {}.", count, repair.found_label));
                total = total.saturating_add(count.saturating_mul(repair.units_per_row));
            }
            Err(err) => {
                ctx.warn(format!("Unable to perform count operation. {}", err));
            }
        }
    }
    total
}
