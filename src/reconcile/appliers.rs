//! Write phase: one prepared UPDATE per applier, executed per operation.

use std::path::{Path, MAIN_SEPARATOR};

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Statement, ToSql};
use serde_json::{json, Value};

use crate::config::ProcessConfig;
use crate::db_manager::{
    DbManager, ALBUM_TYPE, EMPTY_PLAYLIST_JSON, PLAYLIST_TYPE, TABLE_NAME, TRACK_TYPE,
};
use crate::error::TweakError;
use crate::reconcile::operations::{
    PlaylistImageOperation, PlaylistTracklistOperation, TrackNumberOperation,
};
use crate::reconcile::run_context::RunContext;

const LIKE_ESCAPE: char = '!';
const LINKED_CHILD_TYPE: &str = "Manual";

/// Which rows a metadata operation updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataTarget {
    /// Every audio row inside the playlist's folder.
    PlaylistFolder,
    /// The album row itself.
    Album,
}

impl MetadataTarget {
    fn where_clause(self) -> String {
        match self {
            Self::PlaylistFolder => {
                format!("WHERE Path LIKE :path ESCAPE '{LIKE_ESCAPE}' AND MediaType = 'Audio'")
            }
            Self::Album => {
                format!("WHERE Path = :path AND MediaType IS NULL AND type = '{ALBUM_TYPE}'")
            }
        }
    }

    fn directory(self, operation: &PlaylistImageOperation) -> &Path {
        match self {
            Self::PlaylistFolder => operation.folder(),
            Self::Album => &operation.path,
        }
    }

    fn path_parameter(self, operation: &PlaylistImageOperation) -> String {
        match self {
            Self::PlaylistFolder => like_prefix_pattern(operation.folder()),
            Self::Album => operation.path.to_string_lossy().into_owned(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::PlaylistFolder => "playlist",
            Self::Album => "album",
        }
    }
}

/// `LIKE` pattern matching every path strictly below `directory`.
pub fn like_prefix_pattern(directory: &Path) -> String {
    let mut pattern = String::new();
    for ch in directory.to_string_lossy().chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(ch);
    }
    pattern.push(MAIN_SEPARATOR);
    pattern.push('%');
    pattern
}

/// Assignments of the metadata UPDATE, or `None` when no column is enabled.
fn metadata_set_clause(config: &ProcessConfig) -> Option<String> {
    let mut assignments = Vec::new();
    if config.track_artists {
        assignments.extend(["Artists = :artist", "AlbumArtists = :artist", "Album = :album"]);
    }
    if config.playlist_images {
        assignments.push("Images = :image");
    }
    if assignments.is_empty() {
        None
    } else {
        Some(format!("SET {}", assignments.join(", ")))
    }
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn prepare<'db>(
    db: &'db DbManager,
    sql: &str,
    context: &str,
) -> Result<Statement<'db>, TweakError> {
    debug!("update statement: {}", sql);
    db.connection()
        .prepare(sql)
        .map_err(|err| TweakError::sqlite(context, err))
}

fn execute_update(
    ctx: &mut RunContext<'_>,
    stmt: &mut Statement<'_>,
    params: &[(&str, &dyn ToSql)],
    context: &str,
) {
    match stmt.execute(params) {
        Ok(changed) => {
            debug!("{}: {} row(s) changed", context, changed);
            ctx.mark_database_modified();
        }
        Err(err) => ctx.record_error(&TweakError::sqlite(context, err)),
    }
}

fn apply_metadata_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
    operations: &[PlaylistImageOperation],
    target: MetadataTarget,
) {
    if operations.is_empty() {
        return;
    }
    let Some(set_clause) = metadata_set_clause(config) else {
        ctx.warn(format!(
            "No metadata columns enabled, skipping {} {} updates.",
            operations.len(),
            target.label()
        ));
        for _ in operations {
            ctx.advance();
        }
        return;
    };

    let context = format!("update {} metadata", target.label());
    let sql = format!("UPDATE {TABLE_NAME} {set_clause} {}", target.where_clause());
    let mut stmt = match prepare(db, &sql, &context) {
        Ok(stmt) => stmt,
        Err(err) => {
            ctx.record_error(&err);
            return;
        }
    };

    for operation in operations {
        if ctx.is_aborted() {
            break;
        }
        let directory = target.directory(operation);
        ctx.info(format!(
            "Apply update for '{}' {} metadata.",
            folder_name(directory),
            target.label()
        ));
        if !directory.is_dir() {
            ctx.warn(format!(
                "Path '{}' no longer exists, update skipped.",
                directory.display()
            ));
            ctx.advance();
            continue;
        }

        let path = target.path_parameter(operation);
        let mut params: Vec<(&str, &dyn ToSql)> = Vec::with_capacity(4);
        params.push((":path", &path as &dyn ToSql));
        if config.track_artists {
            params.push((":artist", &operation.artist as &dyn ToSql));
            params.push((":album", &operation.album as &dyn ToSql));
        }
        if config.playlist_images {
            params.push((":image", &operation.image as &dyn ToSql));
        }
        execute_update(ctx, &mut stmt, &params, &context);
        ctx.advance();
    }
}

/// Writes artist, album and cover to the audio rows of each playlist folder.
pub fn apply_playlist_image_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
    operations: &[PlaylistImageOperation],
) {
    apply_metadata_operations(db, ctx, config, operations, MetadataTarget::PlaylistFolder);
}

pub fn apply_album_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    config: &ProcessConfig,
    operations: &[PlaylistImageOperation],
) {
    apply_metadata_operations(db, ctx, config, operations, MetadataTarget::Album);
}

pub fn apply_track_number_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    operations: &[TrackNumberOperation],
) {
    if operations.is_empty() {
        return;
    }
    let context = "update track numbers";
    let sql = format!(
        "UPDATE {TABLE_NAME} SET IndexNumber = :index WHERE Path = :path AND type = '{TRACK_TYPE}'"
    );
    let mut stmt = match prepare(db, &sql, context) {
        Ok(stmt) => stmt,
        Err(err) => {
            ctx.record_error(&err);
            return;
        }
    };

    for operation in operations {
        if ctx.is_aborted() {
            break;
        }
        let exists = operation.path.parent().is_some_and(Path::is_dir);
        if !exists {
            ctx.warn(format!(
                "Track path '{}' no longer exists, update skipped.",
                operation.path.display()
            ));
            ctx.advance();
            continue;
        }

        ctx.info(format!(
            "Apply update for '{}' track, track number is {}.",
            folder_name(&operation.path),
            operation.track_number
        ));
        let path = operation.path.to_string_lossy().into_owned();
        let params: [(&str, &dyn ToSql); 2] =
            [(":index", &operation.track_number), (":path", &path)];
        execute_update(ctx, &mut stmt, &params, context);
        ctx.advance();
    }
}

pub fn apply_playlist_tracklist_operations(
    db: &DbManager,
    ctx: &mut RunContext<'_>,
    operations: &[PlaylistTracklistOperation],
) {
    if operations.is_empty() {
        return;
    }
    let context = "update playlist tracks";
    let sql = format!(
        "UPDATE {TABLE_NAME} SET data = :data WHERE Path = :path AND type = '{PLAYLIST_TYPE}'"
    );
    let mut stmt = match prepare(db, &sql, context) {
        Ok(stmt) => stmt,
        Err(err) => {
            ctx.record_error(&err);
            return;
        }
    };

    for operation in operations {
        if ctx.is_aborted() {
            break;
        }
        let folder = operation.path.parent().unwrap_or(&operation.path);
        ctx.info(format!(
            "Apply update for '{}' playlist tracks list.",
            folder_name(folder)
        ));
        if !folder.is_dir() {
            ctx.warn(format!(
                "Playlist path '{}' no longer exists, update skipped.",
                folder.display()
            ));
            ctx.advance();
            continue;
        }

        match build_playlist_payload(operation, Utc::now()) {
            Ok(data) => {
                let path = operation.path.to_string_lossy().into_owned();
                let params: [(&str, &dyn ToSql); 2] = [(":data", &data), (":path", &path)];
                execute_update(ctx, &mut stmt, &params, context);
            }
            Err(err) => ctx.record_error(&err),
        }
        ctx.advance();
    }
}

/// `DateLastSaved` in the server's seven-digit fractional form.
pub fn format_saved_at(saved_at: DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        saved_at.format("%Y-%m-%dT%H:%M:%S"),
        saved_at.timestamp_subsec_nanos() / 100
    )
}

/// Compact playlist document listing `operation`'s members in order.
pub fn build_playlist_payload(
    operation: &PlaylistTracklistOperation,
    saved_at: DateTime<Utc>,
) -> Result<Vec<u8>, TweakError> {
    let mut document: Value = serde_json::from_str(EMPTY_PLAYLIST_JSON)?;
    let children: Vec<Value> = operation
        .members()
        .map(|(track, item_id)| {
            json!({
                "Path": folder_name(track),
                "Type": LINKED_CHILD_TYPE,
                "ItemId": item_id,
            })
        })
        .collect();
    if let Some(root) = document.as_object_mut() {
        root.insert("LinkedChildren".to_string(), Value::Array(children));
        root.insert(
            "DateLastSaved".to_string(),
            Value::String(format_saved_at(saved_at)),
        );
    }
    Ok(serde_json::to_vec(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunEvent;
    use chrono::TimeZone;
    use rusqlite::params;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn insert(db: &DbManager, kind: &str, path: &str, media_type: Option<&str>) {
        db.connection()
            .execute(
                "INSERT INTO TypedBaseItems (type, Path, MediaType) VALUES (?1, ?2, ?3)",
                params![kind, path, media_type],
            )
            .unwrap();
    }

    fn column(db: &DbManager, name: &str, path: &str) -> Option<String> {
        db.connection()
            .query_row(
                &format!("SELECT {name} FROM TypedBaseItems WHERE Path = ?1"),
                params![path],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        let dir = PathBuf::from(format!("{0}music{0}100%_done!", MAIN_SEPARATOR));
        assert_eq!(
            like_prefix_pattern(&dir),
            format!("{0}music{0}100!%!_done!!{0}%", MAIN_SEPARATOR)
        );
    }

    #[test]
    fn test_set_clause_follows_enabled_columns() {
        let all = ProcessConfig::default();
        assert_eq!(
            metadata_set_clause(&all).as_deref(),
            Some("SET Artists = :artist, AlbumArtists = :artist, Album = :album, Images = :image")
        );
        let images_only = ProcessConfig {
            track_artists: false,
            ..ProcessConfig::default()
        };
        assert_eq!(
            metadata_set_clause(&images_only).as_deref(),
            Some("SET Images = :image")
        );
        let none = ProcessConfig {
            track_artists: false,
            playlist_images: false,
            ..ProcessConfig::default()
        };
        assert_eq!(metadata_set_clause(&none), None);
    }

    #[test]
    fn test_saved_at_uses_seven_fraction_digits() {
        let saved_at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(format_saved_at(saved_at), "2024-03-09T07:05:01.1234567Z");
    }

    #[test]
    fn test_payload_lists_members_in_order() {
        let operation = PlaylistTracklistOperation {
            path: PathBuf::from("/m/a/list.m3u"),
            tracks: vec![PathBuf::from("/m/a/01 - x.mp3"), PathBuf::from("/m/a/02 - y.mp3")],
            item_ids: vec!["id1".to_string(), "id2".to_string()],
        };
        let saved_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let payload = build_playlist_payload(&operation, saved_at).unwrap();
        let document: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(
            document["LinkedChildren"],
            json!([
                {"Path": "01 - x.mp3", "Type": "Manual", "ItemId": "id1"},
                {"Path": "02 - y.mp3", "Type": "Manual", "ItemId": "id2"},
            ])
        );
        assert_eq!(document["DateLastSaved"], "2024-01-02T03:04:05.0000000Z");
        assert_eq!(document["PlaylistMediaType"], "Audio");
        assert!(!payload.contains(&b'\n'));
    }

    #[test]
    fn test_playlist_update_touches_only_audio_rows_in_folder() {
        let root = unique_temp_dir("mediadb_tweaker_apply_playlist");
        let album_dir = root.join("Artist - Album");
        fs::create_dir_all(&album_dir).unwrap();
        let inside = album_dir.join("01 - a.mp3").to_string_lossy().into_owned();
        let sibling = format!("{}_other{}02 - b.mp3", album_dir.display(), MAIN_SEPARATOR);
        let album_row = album_dir.to_string_lossy().into_owned();

        let db = DbManager::new_in_memory().unwrap();
        insert(&db, TRACK_TYPE, &inside, Some("Audio"));
        insert(&db, TRACK_TYPE, &sibling, Some("Audio"));
        insert(&db, ALBUM_TYPE, &album_row, None);

        let operation = PlaylistImageOperation {
            path: album_dir.join("Album.m3u"),
            image: "img".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
        };
        let mut events: Vec<RunEvent> = Vec::new();
        {
            let mut ctx = RunContext::new(&mut events, Arc::new(AtomicBool::new(false)));
            ctx.set_total_operations(1);
            apply_playlist_image_operations(&db, &mut ctx, &ProcessConfig::default(), &[operation]);
            assert!(ctx.database_modified());
            assert_eq!(ctx.operation_count(), 1);
            assert_eq!(ctx.last_error(), None);
        }

        assert_eq!(column(&db, "Artists", &inside).as_deref(), Some("Artist"));
        assert_eq!(column(&db, "AlbumArtists", &inside).as_deref(), Some("Artist"));
        assert_eq!(column(&db, "Images", &inside).as_deref(), Some("img"));
        assert_eq!(column(&db, "Album", &sibling), None);
        assert_eq!(column(&db, "Album", &album_row), None);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_missing_directory_is_skipped_but_counted() {
        let db = DbManager::new_in_memory().unwrap();
        insert(&db, ALBUM_TYPE, "/does/not/exist", None);
        let operation = PlaylistImageOperation {
            path: PathBuf::from("/does/not/exist"),
            image: String::new(),
            artist: "A".to_string(),
            album: "B".to_string(),
        };
        let mut events: Vec<RunEvent> = Vec::new();
        let mut ctx = RunContext::new(&mut events, Arc::new(AtomicBool::new(false)));
        apply_album_operations(&db, &mut ctx, &ProcessConfig::default(), &[operation]);
        assert_eq!(ctx.operation_count(), 1);
        assert!(!ctx.database_modified());
    }

    #[test]
    fn test_track_number_update_sets_index() {
        let root = unique_temp_dir("mediadb_tweaker_apply_tracks");
        let track = root.join("1-03 - c.mp3").to_string_lossy().into_owned();
        let db = DbManager::new_in_memory().unwrap();
        insert(&db, TRACK_TYPE, &track, Some("Audio"));

        let operation = TrackNumberOperation {
            path: PathBuf::from(&track),
            track_number: 3,
        };
        let mut events: Vec<RunEvent> = Vec::new();
        {
            let mut ctx = RunContext::new(&mut events, Arc::new(AtomicBool::new(false)));
            apply_track_number_operations(&db, &mut ctx, &[operation]);
        }
        let index: Option<i64> = db
            .connection()
            .query_row(
                "SELECT IndexNumber FROM TypedBaseItems WHERE Path = ?1",
                params![track],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index, Some(3));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_aborted_applier_writes_nothing() {
        let root = unique_temp_dir("mediadb_tweaker_apply_abort");
        let track = root.join("01 - a.mp3").to_string_lossy().into_owned();
        let db = DbManager::new_in_memory().unwrap();
        insert(&db, TRACK_TYPE, &track, Some("Audio"));

        let operation = TrackNumberOperation {
            path: PathBuf::from(&track),
            track_number: 1,
        };
        let mut events: Vec<RunEvent> = Vec::new();
        let mut ctx = RunContext::new(&mut events, Arc::new(AtomicBool::new(true)));
        apply_track_number_operations(&db, &mut ctx, &[operation]);
        assert!(!ctx.database_modified());
        assert_eq!(ctx.operation_count(), 0);
        let _ = fs::remove_dir_all(&root);
    }
}
