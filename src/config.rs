//! Run configuration model, defaults and loading.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::TweakError;

const DEFAULT_IMAGE_NAME: &str = "folder";

/// Root configuration read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Which repairs run and how cover images are found.
    pub repair: ProcessConfig,
}

/// Feature toggles for one reconciliation run.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProcessConfig {
    /// Writes cover descriptors for the audio rows under each playlist folder.
    #[serde(default = "default_true")]
    pub playlist_images: bool,
    /// Rebuilds the track list of playlists that were never populated.
    #[serde(default = "default_true")]
    pub playlist_tracklist: bool,
    /// Includes artist/album columns in playlist and album updates.
    #[serde(default = "default_true")]
    pub track_artists: bool,
    #[serde(default = "default_true")]
    pub track_numbers: bool,
    #[serde(default = "default_true")]
    pub albums: bool,
    /// Substring searched for in file names when looking for a cover image.
    #[serde(default = "default_image_name")]
    pub image_name: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            playlist_images: true,
            playlist_tracklist: true,
            track_artists: true,
            track_numbers: true,
            albums: true,
            image_name: default_image_name(),
        }
    }
}

impl ProcessConfig {
    pub fn any_enabled(&self) -> bool {
        self.playlist_images
            || self.playlist_tracklist
            || self.track_numbers
            || self.albums
    }
}

fn default_true() -> bool {
    true
}

fn default_image_name() -> String {
    DEFAULT_IMAGE_NAME.to_string()
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("mediadb-tweaker").join("config.toml"))
}

pub fn sanitize_config(config: Config) -> Config {
    let image_name = config.repair.image_name.trim();
    let image_name = if image_name.is_empty() {
        default_image_name()
    } else {
        image_name.to_string()
    };

    Config {
        repair: ProcessConfig {
            image_name,
            ..config.repair
        },
    }
}

pub fn parse_config(text: &str) -> Result<Config, TweakError> {
    toml::from_str::<Config>(text)
        .map(sanitize_config)
        .map_err(|err| TweakError::Config(err.to_string()))
}

/// Loads the config file, falling back to defaults when it is missing or broken.
pub fn load_config_file(path: &Path) -> Config {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            info!(
                "No config read from {} ({}). Using defaults.",
                path.display(),
                err
            );
            return Config::default();
        }
    };

    match parse_config(&content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            Config::default()
        }
    }
}
