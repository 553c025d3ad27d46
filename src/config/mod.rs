//! Configuration management for the live voice tutor

pub mod file;

use std::path::PathBuf;

use crate::live::SessionSetup;
use crate::voice::{
    CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE, DEFAULT_FFT_SIZE, PLAYBACK_SAMPLE_RATE,
};
use crate::{Error, Result};

/// Default live model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com";

/// Default tutoring instruction
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful, encouraging English vocabulary tutor for students. Correct their pronunciation gently and have short conversations about daily topics using simple words.";

/// Frames kept while the stream is opening (~8s of 16kHz audio)
const DEFAULT_OUTBOUND_BUFFER_FRAMES: usize = 32;

/// Tutor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Live model stream configuration
    pub live: LiveConfig,

    /// Audio device configuration
    pub audio: AudioConfig,

    /// Path to data directory (settings database)
    pub data_dir: PathBuf,
}

/// Live model stream configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Tutoring system instruction
    pub system_instruction: String,

    /// Base endpoint, overridable per user in the settings store
    pub endpoint: String,
}

impl LiveConfig {
    /// Opening parameters for the stream
    #[must_use]
    pub fn setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Audio device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Samples per capture frame
    pub capture_frame_size: usize,

    /// Capture sample rate in Hz
    pub capture_sample_rate: u32,

    /// Playback sample rate in Hz
    pub playback_sample_rate: u32,

    /// Channels in inbound model audio
    pub playback_channels: u16,

    /// Frames buffered while the stream is opening
    pub outbound_buffer_frames: usize,

    /// Analysis window for the visualizer tap
    pub fft_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_frame_size: CAPTURE_FRAME_SIZE,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            playback_channels: 1,
            outbound_buffer_frames: DEFAULT_OUTBOUND_BUFFER_FRAMES,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }
}

impl AudioConfig {
    /// Check values the audio paths rely on
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.capture_frame_size == 0 {
            return Err(Error::Config("audio.capture_frame_size must be > 0".to_string()));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(Error::Config("audio sample rates must be > 0".to_string()));
        }
        if self.outbound_buffer_frames == 0 {
            return Err(Error::Config("audio.outbound_buffer_frames must be > 0".to_string()));
        }
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(Error::Config(format!(
                "audio.fft_size must be a power of two in 32..=32768, got {}",
                self.fft_size
            )));
        }
        Ok(())
    }
}

/// Return the data directory, creating it if needed
///
/// Uses `~/.local/share/vocab-live` on Linux
pub fn default_data_dir() -> PathBuf {
    let data_dir = directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("vocab-live"));

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    data_dir
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting audio settings are invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resulting audio settings are invalid
    pub fn resolve(
        fc: file::TutorConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = LiveConfig::default();

        let live = LiveConfig {
            model: env("TUTOR_MODEL")
                .or(fc.live.model)
                .unwrap_or(defaults.model),
            voice: env("TUTOR_VOICE")
                .or(fc.live.voice)
                .unwrap_or(defaults.voice),
            system_instruction: env("TUTOR_SYSTEM_INSTRUCTION")
                .or(fc.live.system_instruction)
                .unwrap_or(defaults.system_instruction),
            endpoint: env("TUTOR_ENDPOINT")
                .or(fc.live.endpoint)
                .unwrap_or(defaults.endpoint),
        };

        let default_audio = AudioConfig::default();
        let audio = AudioConfig {
            capture_frame_size: fc
                .audio
                .capture_frame_size
                .unwrap_or(default_audio.capture_frame_size),
            capture_sample_rate: fc
                .audio
                .capture_sample_rate
                .unwrap_or(default_audio.capture_sample_rate),
            playback_sample_rate: fc
                .audio
                .playback_sample_rate
                .unwrap_or(default_audio.playback_sample_rate),
            playback_channels: default_audio.playback_channels,
            outbound_buffer_frames: fc
                .audio
                .outbound_buffer_frames
                .unwrap_or(default_audio.outbound_buffer_frames),
            fft_size: fc.audio.fft_size.unwrap_or(default_audio.fft_size),
        };
        audio.validate()?;

        let data_dir = env("TUTOR_DATA_DIR").map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            live,
            audio,
            data_dir,
        })
    }

    /// Path of the settings database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tutor.db")
    }
}
