use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::TweakError;

pub const TRACK_EXTENSION: &str = "mp3";

pub fn is_track_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(TRACK_EXTENSION))
        .unwrap_or(false)
}

fn sorted_directory_entries(directory: &Path) -> Result<BTreeSet<PathBuf>, TweakError> {
    let entries =
        std::fs::read_dir(directory).map_err(|err| TweakError::io(directory, err))?;

    let mut paths = BTreeSet::new();
    for entry in entries {
        match entry {
            Ok(entry) => {
                paths.insert(entry.path());
            }
            Err(err) => {
                debug!(
                    "Failed to read a directory entry in {}: {}",
                    directory.display(),
                    err
                );
            }
        }
    }
    Ok(paths)
}

/// `.mp3` files directly inside `directory`, in path order.
pub fn collect_track_files(directory: &Path) -> Result<Vec<PathBuf>, TweakError> {
    Ok(sorted_directory_entries(directory)?
        .into_iter()
        .filter(|path| path.is_file() && is_track_file(path))
        .collect())
}

/// First file (in path order) whose name contains `needle`.
pub fn find_file_named_like(directory: &Path, needle: &str) -> Result<Option<PathBuf>, TweakError> {
    Ok(sorted_directory_entries(directory)?
        .into_iter()
        .filter(|path| path.is_file())
        .find(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains(needle))
                .unwrap_or(false)
        }))
}

#[cfg(test)]
mod tests {
    use super::{collect_track_files, find_file_named_like, is_track_file};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "mediadb_tweaker_discovery_{}_{}_{}",
            test_name,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn test_is_track_file_ignores_case_and_other_formats() {
        assert!(is_track_file(Path::new("/a/01 - x.mp3")));
        assert!(is_track_file(Path::new("/a/01 - x.MP3")));
        assert!(!is_track_file(Path::new("/a/01 - x.flac")));
        assert!(!is_track_file(Path::new("/a/mp3")));
    }

    #[test]
    fn test_collect_track_files_sorts_and_filters() {
        let dir = unique_temp_dir("collect");
        for name in ["b.mp3", "a.mp3", "cover.jpg", "c.flac"] {
            fs::write(dir.join(name), b"x").unwrap();
        }
        fs::create_dir(dir.join("nested.mp3")).unwrap();

        let tracks = collect_track_files(&dir).expect("listing should work");
        assert_eq!(tracks, vec![dir.join("a.mp3"), dir.join("b.mp3")]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_find_file_named_like_returns_first_match_in_order() {
        let dir = unique_temp_dir("find");
        for name in ["zz-folder.png", "folder.jpg", "track.mp3"] {
            fs::write(dir.join(name), b"x").unwrap();
        }

        let found = find_file_named_like(&dir, "folder").expect("listing should work");
        assert_eq!(found, Some(dir.join("folder.jpg")));
        assert_eq!(find_file_named_like(&dir, "cover").unwrap(), None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = unique_temp_dir("missing").join("gone");
        assert!(collect_track_files(&dir).is_err());
    }
}
