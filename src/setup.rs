//! Interactive first-run setup wizard (`tutor setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Confirm, Input, Select};

use crate::config::file::{AudioFileConfig, LiveFileConfig, TutorConfigFile};
use crate::config::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};
use crate::db::{SettingsRepo, mask_key};

/// Prebuilt voices offered by the wizard
const VOICES: [&str; 5] = ["Zephyr", "Puck", "Charon", "Kore", "Fenrir"];

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup(settings: &SettingsRepo) -> anyhow::Result<()> {
    println!("Vocabulary Tutor Setup\n");

    // Load existing config if present
    let existing = crate::config::file::load_config_file();
    let config_path = crate::config::file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/vocab-live/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. API key
    let stored = settings.get()?;
    let existing_key = stored.as_ref().and_then(|s| s.api_key.clone());

    let prompt = existing_key.as_deref().map_or_else(
        || "Gemini API key (GEMINI_API_KEY)".to_string(),
        |k| format!("Gemini API key (current: {}, leave blank to keep)", mask_key(k)),
    );

    let api_key_input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    let api_key = if api_key_input.trim().is_empty() {
        existing_key
    } else {
        Some(api_key_input.trim().to_string())
    };

    // 2. Endpoint override
    let existing_endpoint = stored.and_then(|s| s.api_endpoint);
    let use_proxy = Confirm::new()
        .with_prompt("Connect through a custom endpoint or proxy?")
        .default(existing_endpoint.is_some())
        .interact()?;

    let api_endpoint = if use_proxy {
        let endpoint: String = Input::new()
            .with_prompt("Endpoint URL")
            .default(
                existing_endpoint
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            )
            .interact_text()?;
        Some(endpoint)
    } else {
        None
    };

    match api_key {
        Some(ref key) => {
            settings.save(key, api_endpoint.as_deref())?;
        }
        None => println!("No API key saved; set GEMINI_API_KEY before starting a session."),
    }

    // 3. Voice
    let default_voice = existing
        .live
        .voice
        .as_deref()
        .and_then(|v| VOICES.iter().position(|&l| l.eq_ignore_ascii_case(v)))
        .unwrap_or(0);

    let voice_idx = Select::new()
        .with_prompt("Select the tutor's voice")
        .items(&VOICES)
        .default(default_voice)
        .interact()?;

    // 4. Model
    let model: String = Input::new()
        .with_prompt("Live model")
        .default(
            existing
                .live
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        )
        .interact_text()?;

    // 5. Build and write config
    let voice = VOICES[voice_idx];
    let config_file = TutorConfigFile {
        live: LiveFileConfig {
            model: (model != DEFAULT_MODEL).then_some(model),
            voice: (voice != DEFAULT_VOICE).then(|| voice.to_string()),
            system_instruction: existing.live.system_instruction,
            endpoint: existing.live.endpoint,
        },
        audio: existing.audio,
    };

    write_config(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());

    println!("\nSetup complete! Run `tutor -v` to start a session.");

    Ok(())
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &TutorConfigFile) -> anyhow::Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, serialize_config(config))?;

    Ok(())
}

fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

/// Serialize config to a readable TOML string
fn serialize_config(config: &TutorConfigFile) -> String {
    let mut out = String::new();

    // [live]
    let lv = &config.live;
    let live: Vec<(&str, &Option<String>)> = vec![
        ("model", &lv.model),
        ("voice", &lv.voice),
        ("system_instruction", &lv.system_instruction),
        ("endpoint", &lv.endpoint),
    ];
    if live.iter().any(|(_, v)| v.is_some()) {
        out.push_str("[live]\n");
        for (key, val) in live {
            if let Some(v) = val {
                out.push_str(&format!("{key} = {}\n", quoted(v)));
            }
        }
        out.push('\n');
    }

    // [audio]
    let au: &AudioFileConfig = &config.audio;
    let audio: [(&str, Option<u64>); 5] = [
        ("capture_frame_size", au.capture_frame_size.and_then(|v| u64::try_from(v).ok())),
        ("capture_sample_rate", au.capture_sample_rate.map(u64::from)),
        ("playback_sample_rate", au.playback_sample_rate.map(u64::from)),
        ("outbound_buffer_frames", au.outbound_buffer_frames.and_then(|v| u64::try_from(v).ok())),
        ("fft_size", au.fft_size.and_then(|v| u64::try_from(v).ok())),
    ];
    if audio.iter().any(|(_, v)| v.is_some()) {
        out.push_str("[audio]\n");
        for (key, val) in audio {
            if let Some(v) = val {
                out.push_str(&format!("{key} = {v}\n"));
            }
        }
        out.push('\n');
    }

    out
}
