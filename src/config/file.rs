//! TOML configuration file loading
//!
//! Supports `~/.config/vocab-live/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TutorConfigFile {
    /// Live model stream configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Audio device configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Live model stream configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Model identifier
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Zephyr")
    pub voice: Option<String>,

    /// Tutoring system instruction
    pub system_instruction: Option<String>,

    /// Base endpoint, for reverse proxies
    pub endpoint: Option<String>,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per capture frame
    pub capture_frame_size: Option<usize>,

    /// Capture sample rate in Hz
    pub capture_sample_rate: Option<u32>,

    /// Playback sample rate in Hz
    pub playback_sample_rate: Option<u32>,

    /// Frames buffered while the stream is opening
    pub outbound_buffer_frames: Option<usize>,

    /// Analysis window for the visualizer tap
    pub fft_size: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TutorConfigFile {
    config_file_path().map_or_else(TutorConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or invalid files yield defaults with a warning.
pub fn load_from(path: &Path) -> TutorConfigFile {
    if !path.exists() {
        return TutorConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TutorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TutorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/vocab-live/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vocab-live").join("config.toml"))
}
