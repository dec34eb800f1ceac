//! Access to the media server's item table.
//!
//! Only the columns the repairs touch are referenced, always by name.

use std::ops::ControlFlow;
use std::path::Path;

use log::debug;
use rusqlite::types::Value;
use rusqlite::{named_params, params_from_iter, Connection, OpenFlags, OptionalExtension};

use crate::error::TweakError;

pub const TABLE_NAME: &str = "TypedBaseItems";
pub const PLAYLIST_TYPE: &str = "MediaBrowser.Controller.Playlists.Playlist";
pub const ALBUM_TYPE: &str = "MediaBrowser.Controller.Entities.Audio.MusicAlbum";
pub const TRACK_TYPE: &str = "MediaBrowser.Controller.Entities.Audio.Audio";

/// Column holding the textual item id referenced by playlist children.
pub const ITEM_ID_COLUMN: &str = "PresentationUniqueKey";
pub const PATH_COLUMN: &str = "Path";

/// Payload of a playlist the server created but never filled.
/// Stored verbatim as the `data` blob; also the template for rebuilt payloads.
pub const EMPTY_PLAYLIST_JSON: &str = concat!(
    r#"{"OwnerUserId":"00000000000000000000000000000000","Shares":[],"#,
    r#""PlaylistMediaType":"Audio","IsRoot":false,"LinkedChildren":[],"#,
    r#""IsHD":false,"IsShortcut":false,"Width":0,"Height":0,"ExtraIds":[],"#,
    r#""DateLastSaved":"0001-01-01T00:00:00.0000000Z","RemoteTrailers":[],"#,
    r#""SupportsExternalTransfer":false}"#
);

pub fn empty_playlist_blob() -> &'static [u8] {
    EMPTY_PLAYLIST_JSON.as_bytes()
}

/// Row-selection predicates, one per repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSelection {
    PlaylistsMissingMetadata,
    EmptyPlaylists,
    TracksMissingIndex,
    AlbumsMissingMetadata,
}

impl RowSelection {
    pub fn where_clause(self) -> String {
        const MISSING_METADATA: &str = "(Images IS NULL OR Album IS NULL OR Artists IS NULL)";
        match self {
            Self::PlaylistsMissingMetadata => {
                format!("WHERE type = '{PLAYLIST_TYPE}' AND {MISSING_METADATA}")
            }
            Self::EmptyPlaylists => format!("WHERE type = '{PLAYLIST_TYPE}' AND data = ?1"),
            Self::TracksMissingIndex => {
                format!("WHERE type = '{TRACK_TYPE}' AND IndexNumber IS NULL")
            }
            Self::AlbumsMissingMetadata => {
                format!("WHERE type = '{ALBUM_TYPE}' AND {MISSING_METADATA}")
            }
        }
    }

    fn bound_values(self) -> Vec<Value> {
        match self {
            Self::EmptyPlaylists => vec![Value::Blob(empty_playlist_blob().to_vec())],
            _ => Vec::new(),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::PlaylistsMissingMetadata => "playlists missing image/artist/album",
            Self::EmptyPlaylists => "empty playlists",
            Self::TracksMissingIndex => "tracks missing track number",
            Self::AlbumsMissingMetadata => "albums missing image/artist/album",
        }
    }
}

/// One selected row, reduced to the fields the generators read.
#[derive(Debug, Clone)]
pub struct SelectedRow {
    pub path: Option<String>,
}

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn open(path: &Path) -> Result<Self, TweakError> {
        if !path.is_file() {
            return Err(TweakError::NotADatabase(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| TweakError::sqlite("open database", err))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count_rows(&self, selection: RowSelection) -> Result<u64, TweakError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {TABLE_NAME} {}",
            selection.where_clause()
        );
        debug!("count query: {}", sql);
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(selection.bound_values()), |row| {
                row.get(0)
            })
            .map_err(|err| TweakError::sqlite(format!("count {}", selection.describe()), err))?;
        Ok(count.max(0) as u64)
    }

    /// Streams every row matching `selection` into `visit` until it breaks.
    pub fn for_each_selected_row<F>(
        &self,
        selection: RowSelection,
        mut visit: F,
    ) -> Result<(), TweakError>
    where
        F: FnMut(SelectedRow) -> ControlFlow<()>,
    {
        let context = format!("select {}", selection.describe());
        let sql = format!("SELECT * FROM {TABLE_NAME} {}", selection.where_clause());
        debug!("select query: {}", sql);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| TweakError::sqlite(context.clone(), err))?;
        let mut rows = stmt
            .query(params_from_iter(selection.bound_values()))
            .map_err(|err| TweakError::sqlite(context.clone(), err))?;

        while let Some(row) = rows
            .next()
            .map_err(|err| TweakError::sqlite(context.clone(), err))?
        {
            let path = row
                .get::<_, Option<String>>(PATH_COLUMN)
                .map_err(|err| TweakError::sqlite(context.clone(), err))?;
            if visit(SelectedRow { path }).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Prepared point lookup of a track's item id by its stored path.
    pub fn track_id_lookup(&self) -> Result<TrackIdLookup<'_>, TweakError> {
        let sql = format!(
            "SELECT {ITEM_ID_COLUMN} FROM {TABLE_NAME} WHERE type = '{TRACK_TYPE}' AND {PATH_COLUMN} = :path"
        );
        let stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| TweakError::sqlite("prepare track id lookup", err))?;
        Ok(TrackIdLookup { stmt })
    }
}

pub struct TrackIdLookup<'conn> {
    stmt: rusqlite::Statement<'conn>,
}

impl TrackIdLookup<'_> {
    pub fn find(&mut self, track_path: &str) -> Result<Option<String>, TweakError> {
        self.stmt
            .query_row(named_params! { ":path": track_path }, |row| row.get::<_, Option<String>>(0))
            .optional()
            .map(Option::flatten)
            .map_err(|err| TweakError::sqlite(format!("look up track '{track_path}'"), err))
    }
}

#[cfg(test)]
pub(crate) const TEST_SCHEMA: &str = "CREATE TABLE TypedBaseItems (
    guid TEXT,
    type TEXT NOT NULL,
    data BLOB,
    Path TEXT,
    Images TEXT,
    Album TEXT,
    Artists TEXT,
    AlbumArtists TEXT,
    MediaType TEXT,
    IndexNumber INTEGER,
    PresentationUniqueKey TEXT
)";

#[cfg(test)]
impl DbManager {
    pub(crate) fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute(TEST_SCHEMA, [])?;
        Ok(Self { conn })
    }

    pub(crate) fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}
