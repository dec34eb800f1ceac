//! Error types shared by the reconciliation engine.

use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop the current phase (or, at the CLI boundary, the program).
#[derive(Debug, Error)]
pub enum TweakError {
    #[error("SQLite3 error in {context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("playlist document error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("database path '{}' is not a regular file", .0.display())]
    NotADatabase(PathBuf),
}

impl TweakError {
    pub fn sqlite(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Sqlite {
            context: context.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a track file name could not be turned into a track number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackNumberError {
    #[error("file name '{0}' has no ' - ' separator")]
    MissingSeparator(String),
    #[error("track token '{0}' is not a number")]
    InvalidNumber(String),
}

#[cfg(test)]
mod tests {
    use super::TweakError;

    #[test]
    fn test_sqlite_error_message_names_context() {
        let err = TweakError::sqlite("count playlists", rusqlite::Error::InvalidQuery);
        let message = err.to_string();
        assert!(message.starts_with("SQLite3 error in count playlists:"));
    }
}
